//! The audio processing graph.
//!
//! Elements are added by name and wired port-to-port into an acyclic
//! network terminating at a sink element named `out`. Prepare walks the
//! elements in topological order, propagating each link's upstream format
//! into the downstream port just before the downstream element negotiates
//! its own formats.
//!
//! One `process` call performs one step: buffers first cross their links
//! (so a buffer pushed at step `k` is consumed at step `k+1`), then every
//! element runs once in topological order, and finally the sink's output
//! is drained into the graph's own output port. A failing element degrades
//! the step (logged, nothing emitted) rather than aborting the graph.
//!
//! A graph is itself an [`Element`], so a prepared graph can be attached
//! as a single source under a track mixer.

use crate::buffer::BufferAllocator;
use crate::command::Command;
use crate::elements::{create_element, Element, ElementCreateArgs, PrepareParams};
use crate::elements::{find_input_port, find_output_port, new_element_id};
use crate::error::{Error, Result};
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::Loader;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The sink element every graph terminates at.
pub const SINK_NAME: &str = "out";

#[derive(Debug, Clone, Copy)]
struct Link {
    src_elem: usize,
    src_port: usize,
    dst_elem: usize,
    dst_port: usize,
}

pub struct Graph {
    name: String,
    id: String,
    elements: Vec<Box<dyn Element>>,
    links: Vec<Link>,
    order: Vec<usize>,
    sink: usize,
    output: Port,
    prepared: bool,
}

impl Graph {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            elements: Vec::new(),
            links: Vec::new(),
            order: Vec::new(),
            sink: usize::MAX,
            output: Port::new("out"),
            prepared: false,
        }
    }

    /// Rename the graph. Played instances of one description get unique
    /// names so they can coexist under a track mixer.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Add an element; returns its index.
    pub fn add_element(&mut self, element: Box<dyn Element>) -> usize {
        self.elements.push(element);
        self.elements.len() - 1
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    fn element_index(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.name() == name)
    }

    pub fn find_element_mut(&mut self, name: &str) -> Option<&mut dyn Element> {
        self.elements
            .iter_mut()
            .find(|e| e.name() == name)
            .map(|e| e.as_mut() as &mut dyn Element)
    }

    /// Wire `(src_elem, src_port) -> (dst_elem, dst_port)` by names.
    pub fn link_elements(
        &mut self,
        src_elem: &str,
        src_port: &str,
        dst_elem: &str,
        dst_port: &str,
    ) -> Result<()> {
        let src_index = self
            .element_index(src_elem)
            .ok_or_else(|| Error::InvalidGraph(format!("unknown element '{}'", src_elem)))?;
        let dst_index = self
            .element_index(dst_elem)
            .ok_or_else(|| Error::InvalidGraph(format!("unknown element '{}'", dst_elem)))?;
        let src_port_index = find_output_port(self.elements[src_index].as_mut(), src_port)
            .ok_or_else(|| {
                Error::InvalidGraph(format!("element '{}' has no output port '{}'", src_elem, src_port))
            })?;
        let dst_port_index = find_input_port(self.elements[dst_index].as_mut(), dst_port)
            .ok_or_else(|| {
                Error::InvalidGraph(format!("element '{}' has no input port '{}'", dst_elem, dst_port))
            })?;
        self.links.push(Link {
            src_elem: src_index,
            src_port: src_port_index,
            dst_elem: dst_index,
            dst_port: dst_port_index,
        });
        Ok(())
    }

    /// Kahn's algorithm over the link edges; a leftover node means a cycle.
    fn topological_order(&self) -> Result<Vec<usize>> {
        let n = self.elements.len();
        let mut in_degree = vec![0usize; n];
        for link in &self.links {
            in_degree[link.dst_elem] += 1;
        }
        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(index) = ready.pop() {
            order.push(index);
            for link in &self.links {
                if link.src_elem == index {
                    in_degree[link.dst_elem] -= 1;
                    if in_degree[link.dst_elem] == 0 {
                        ready.push(link.dst_elem);
                    }
                }
            }
        }
        if order.len() != n {
            return Err(Error::InvalidGraph(format!(
                "cycle in audio graph '{}'",
                self.name
            )));
        }
        Ok(order)
    }
}

impl Element for Graph {
    fn kind(&self) -> &'static str {
        "Graph"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, loader: &dyn Loader, params: &PrepareParams) -> Result<()> {
        self.sink = self
            .element_index(SINK_NAME)
            .ok_or_else(|| Error::InvalidGraph(format!("graph '{}' has no sink element", self.name)))?;
        if self.elements[self.sink].num_output_ports() == 0 {
            return Err(Error::InvalidGraph(format!(
                "sink of graph '{}' has no output port",
                self.name
            )));
        }

        self.order = self.topological_order()?;

        for position in 0..self.order.len() {
            let index = self.order[position];
            // Pull upstream formats into this element's input ports; every
            // upstream element has already prepared at this point.
            for link_index in 0..self.links.len() {
                let link = self.links[link_index];
                if link.dst_elem != index {
                    continue;
                }
                let format = self.elements[link.src_elem]
                    .output_port(link.src_port)
                    .format();
                self.elements[link.dst_elem]
                    .input_port(link.dst_port)
                    .set_format(format);
            }
            self.elements[index].prepare(loader, params)?;
        }

        let sink_format = self.elements[self.sink].output_port(0).format();
        self.output.set_format(sink_format);
        self.prepared = true;
        debug!(
            "Audio graph prepared. [graph={}, elements={}, output={}]",
            self.name,
            self.elements.len(),
            sink_format
        );
        Ok(())
    }

    fn process(
        &mut self,
        allocator: &BufferAllocator,
        events: &mut EventQueue,
        milliseconds: u32,
    ) -> Result<()> {
        if !self.prepared {
            return Err(Error::InvalidGraph(format!(
                "graph '{}' was not prepared",
                self.name
            )));
        }

        // Move buffers across the links first so every element sees the
        // output of the previous step.
        for link_index in 0..self.links.len() {
            let link = self.links[link_index];
            if self.elements[link.dst_elem].input_port(link.dst_port).is_full() {
                continue;
            }
            if let Some(buffer) = self.elements[link.src_elem]
                .output_port(link.src_port)
                .pull_buffer()
            {
                self.elements[link.dst_elem]
                    .input_port(link.dst_port)
                    .push_buffer(buffer);
            }
        }

        for position in 0..self.order.len() {
            let index = self.order[position];
            if let Err(e) = self.elements[index].process(allocator, events, milliseconds) {
                warn!(
                    "Audio element step failed. [graph={}, elem={}, error={}]",
                    self.name,
                    self.elements[index].name(),
                    e
                );
            }
        }

        if !self.output.is_full() {
            if let Some(buffer) = self.elements[self.sink].output_port(0).pull_buffer() {
                self.output.push_buffer(buffer);
            }
        }
        Ok(())
    }

    fn advance(&mut self, milliseconds: u32) {
        for element in &mut self.elements {
            element.advance(milliseconds);
        }
    }

    fn shutdown(&mut self) {
        for element in &mut self.elements {
            element.shutdown();
        }
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_source_done(&self) -> bool {
        self.elements
            .iter()
            .filter(|e| e.is_source())
            .all(|e| e.is_source_done())
    }

    fn dispatch_command(&mut self, dest: &str, cmd: Command) -> Option<Command> {
        if let Some(element) = self.find_element_mut(dest) {
            element.receive_command(cmd);
            return None;
        }
        let mut cmd = cmd;
        for element in &mut self.elements {
            match element.dispatch_command(dest, cmd) {
                None => return None,
                Some(returned) => cmd = returned,
            }
        }
        Some(cmd)
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.output
    }
}

/// One link in a serialisable graph description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDesc {
    pub src_element: String,
    pub src_port: String,
    pub dst_element: String,
    pub dst_port: String,
}

/// Data description of a graph: the element list plus the wiring. This is
/// the form playback requests refer to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDesc {
    pub name: String,
    #[serde(default)]
    pub id: String,
    pub elements: Vec<ElementCreateArgs>,
    pub links: Vec<LinkDesc>,
}

impl GraphDesc {
    /// Instantiate the description into an unprepared graph.
    pub fn build(&self) -> Result<Graph> {
        let id = if self.id.is_empty() {
            new_element_id()
        } else {
            self.id.clone()
        };
        let mut graph = Graph::new(self.name.clone(), id);
        for desc in &self.elements {
            let element = create_element(desc)?;
            graph.add_element(element);
        }
        for link in &self.links {
            graph.link_elements(
                &link.src_element,
                &link.src_port,
                &link.dst_element,
                &link.dst_port,
            )?;
        }
        Ok(graph)
    }
}
