//! End-to-end graph playback: file sources through a sink, playlists,
//! stereo plumbing, frame accounting.

mod helpers;

use ember_audio::buffer::{BufferAllocator, BufferHandle};
use ember_audio::elements::{
    Element, Gain, Playlist, PrepareParams, SineSource, StereoJoiner, StereoSplitter,
};
use ember_audio::graph::{Graph, SINK_NAME};
use ember_audio::source::FileLoader;
use ember_audio::EventQueue;
use helpers::{file_graph_desc, sine_samples, stereo_format, write_wav};

/// Drive a prepared graph until its sources are done, collecting sink
/// output. `slice_ms` is the device slice; the bound stops a runaway.
fn run_graph(graph: &mut Graph, slice_ms: u32, max_steps: usize) -> Vec<BufferHandle> {
    let allocator = BufferAllocator::new();
    let mut events = EventQueue::new();
    let mut buffers = Vec::new();
    for _ in 0..max_steps {
        graph.process(&allocator, &mut events, slice_ms).unwrap();
        if let Some(buffer) = graph.output_port(0).pull_buffer() {
            buffers.push(buffer);
        }
        if graph.is_source_done() {
            // Flush the pipeline tail.
            for _ in 0..4 {
                graph.process(&allocator, &mut events, slice_ms).unwrap();
                if let Some(buffer) = graph.output_port(0).pull_buffer() {
                    buffers.push(buffer);
                }
            }
            break;
        }
    }
    buffers
}

#[test]
fn test_simple_file_playback() {
    let dir = tempfile::tempdir().unwrap();
    // 2000 stereo frames at 44100 Hz: three 20ms slices (882+882+236).
    let samples = sine_samples(44100, 2, 2000, 440.0);
    let path = write_wav(dir.path(), "a.wav", 44100, 2, &samples);

    let desc = file_graph_desc("playback", &path.display().to_string(), "simple-playback-id", 1);
    let mut graph = desc.build().unwrap();
    graph
        .prepare(&FileLoader, &PrepareParams::default())
        .unwrap();
    assert_eq!(graph.output_port(0).format(), stereo_format());

    let buffers = run_graph(&mut graph, 20, 64);
    assert_eq!(buffers.len(), 3, "expected ceil(2000/882) sink buffers");
    assert_eq!(buffers[0].frame_count(), 882);
    assert_eq!(buffers[1].frame_count(), 882);
    assert_eq!(buffers[2].frame_count(), 236);

    // Only the final buffer carries the winding-down marker.
    assert!(!buffers[0].all_sources_done());
    assert!(!buffers[1].all_sources_done());
    assert!(buffers[2].all_sources_done());
    assert!(graph.is_source_done());

    // Frame conservation: everything decoded arrived at the sink intact.
    let emitted: usize = buffers.iter().map(|b| b.frame_count()).sum();
    assert_eq!(emitted, 2000);
    let mut played = Vec::new();
    for buffer in &buffers {
        played.extend_from_slice(buffer.as_f32());
    }
    assert_eq!(played, samples);
}

#[test]
fn test_looped_playback_frame_conservation() {
    let dir = tempfile::tempdir().unwrap();
    let samples = sine_samples(44100, 2, 500, 330.0);
    let path = write_wav(dir.path(), "loop.wav", 44100, 2, &samples);

    for loops in [1u32, 2, 3] {
        let desc = file_graph_desc(
            "loops",
            &path.display().to_string(),
            &format!("loop-id-{}", loops),
            loops,
        );
        let mut graph = desc.build().unwrap();
        graph
            .prepare(&FileLoader, &PrepareParams::default())
            .unwrap();
        let buffers = run_graph(&mut graph, 20, 256);
        let emitted: usize = buffers.iter().map(|b| b.frame_count()).sum();
        assert_eq!(emitted, 500 * loops as usize, "loops={}", loops);
    }
}

#[test]
fn test_stereo_split_join_round_trip() {
    // SineSource(stereo) -> StereoSplitter -> StereoJoiner -> out must be
    // byte-for-byte the direct sine output.
    let mut graph = Graph::new("roundtrip", "rt-id");
    graph.add_element(Box::new(SineSource::new(
        "sine",
        "sine-id",
        stereo_format(),
        440,
        100,
    )));
    graph.add_element(Box::new(StereoSplitter::new("split", "split-id")));
    graph.add_element(Box::new(StereoJoiner::new(SINK_NAME, "join-id")));
    graph.link_elements("sine", "out", "split", "in").unwrap();
    graph.link_elements("split", "left", SINK_NAME, "left").unwrap();
    graph
        .link_elements("split", "right", SINK_NAME, "right")
        .unwrap();
    graph
        .prepare(&FileLoader, &PrepareParams::default())
        .unwrap();
    assert_eq!(graph.output_port(0).format(), stereo_format());

    let buffers = run_graph(&mut graph, 20, 64);
    let mut rejoined = Vec::new();
    for buffer in &buffers {
        rejoined.extend_from_slice(buffer.as_f32());
    }

    let expected = sine_samples(44100, 2, 4410, 440.0);
    assert_eq!(rejoined, expected);
}

#[test]
fn test_format_propagation_along_links() {
    let desc = helpers::sine_graph_desc("fmt", stereo_format(), 440, 0);
    let mut graph = desc.build().unwrap();
    graph
        .prepare(&FileLoader, &PrepareParams::default())
        .unwrap();
    let sink = graph.find_element_mut("out").unwrap();
    assert_eq!(sink.input_port(0).format(), stereo_format());
    assert_eq!(sink.output_port(0).format(), stereo_format());
}

#[test]
fn test_playlist_plays_files_in_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let first = sine_samples(44100, 2, 882, 440.0);
    let second = sine_samples(44100, 2, 882, 880.0);
    let path_a = write_wav(dir.path(), "first.wav", 44100, 2, &first);
    let path_b = write_wav(dir.path(), "second.wav", 44100, 2, &second);

    let mut graph = Graph::new("playlist", "pl-id");
    graph.add_element(Box::new(ember_audio::elements::FileSource::new(
        "a",
        "pl-a-id",
        path_a.display().to_string(),
        ember_audio::SampleType::Float32,
        1,
    )));
    graph.add_element(Box::new(ember_audio::elements::FileSource::new(
        "b",
        "pl-b-id",
        path_b.display().to_string(),
        ember_audio::SampleType::Float32,
        1,
    )));
    graph.add_element(Box::new(Playlist::new(
        "list",
        "list-id",
        vec!["in0".to_string(), "in1".to_string()],
    )));
    graph.add_element(Box::new(Gain::new(SINK_NAME, "gain-id", 1.0)));
    graph.link_elements("a", "out", "list", "in0").unwrap();
    graph.link_elements("b", "out", "list", "in1").unwrap();
    graph.link_elements("list", "out", SINK_NAME, "in").unwrap();
    graph
        .prepare(&FileLoader, &PrepareParams::default())
        .unwrap();

    let buffers = run_graph(&mut graph, 20, 64);
    let mut played = Vec::new();
    for buffer in &buffers {
        played.extend_from_slice(buffer.as_f32());
    }

    let mut expected = first.clone();
    expected.extend_from_slice(&second);
    assert_eq!(played, expected);
}
