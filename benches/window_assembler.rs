use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use voicewire::WindowAssembler;

/// Synthesize a speech-length stream of samples.
fn synth_stream(len: usize) -> Vec<f32> {
    (0..len).map(|i| (i as f32 * 0.013).sin() * 0.6).collect()
}

/// Drive the assembler over a full stream in capture-sized chunks.
fn assemble_stream(samples: &[f32], window_size: usize, overlap: f32) -> usize {
    let mut assembler = WindowAssembler::new(window_size, overlap).expect("valid window config");
    let mut emitted = 0;
    for chunk in samples.chunks(256) {
        assembler.add_chunk(chunk);
        while let Some(window) = assembler.take_window() {
            black_box(&window);
            emitted += 1;
        }
    }
    if let Some(remainder) = assembler.flush() {
        black_box(&remainder);
        emitted += 1;
    }
    emitted
}

fn bench_window_assembler(c: &mut Criterion) {
    // Ten seconds of 16kHz audio
    let stream = synth_stream(160_000);

    let mut group = c.benchmark_group("window_assembler");
    for &overlap in &[0.0f32, 0.2, 0.5] {
        group.bench_with_input(
            BenchmarkId::new("assemble_10s", format!("overlap_{overlap}")),
            &overlap,
            |b, &overlap| {
                b.iter(|| assemble_stream(black_box(&stream), 4096, overlap));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_window_assembler);
criterion_main!(benches);
