//! Mixing throughput: many full slices combined per device tick.

use criterion::{criterion_group, criterion_main, Criterion};
use ember_audio::buffer::{BufferAllocator, BufferHandle};
use ember_audio::elements::{Element, Mixer, PrepareParams};
use ember_audio::source::FileLoader;
use ember_audio::{EventQueue, Format, SampleType};
use std::sync::Arc;

fn bench_mixer(c: &mut Criterion) {
    let format = Format::new(44100, 2, SampleType::Float32);
    let allocator = BufferAllocator::new();

    let make_buffer = || -> BufferHandle {
        let mut buffer = allocator.allocate(format, 882).unwrap();
        for (n, sample) in buffer.as_f32_mut().iter_mut().enumerate() {
            *sample = ((n % 100) as f32 / 100.0) - 0.5;
        }
        Arc::new(buffer)
    };

    for inputs in [2usize, 8] {
        c.bench_function(&format!("mix_{}_slices_20ms", inputs), |b| {
            let mut mixer = Mixer::with_inputs("bench", "bench-id", inputs);
            for i in 0..inputs {
                mixer.input_port(i).set_format(format);
            }
            mixer
                .prepare(&FileLoader, &PrepareParams::default())
                .unwrap();
            let mut events = EventQueue::new();

            b.iter(|| {
                for i in 0..inputs {
                    mixer.input_port(i).push_buffer(make_buffer());
                }
                mixer.process(&allocator, &mut events, 20).unwrap();
                criterion::black_box(mixer.output_port(0).pull_buffer());
            });
        });
    }
}

criterion_group!(benches, bench_mixer);
criterion_main!(benches);
