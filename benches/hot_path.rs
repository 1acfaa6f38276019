use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::VecDeque;

use streamchat_rs::protocol::{decode, decode_chunk, StreamEvent};
use streamchat_rs::reconcile::{decide_merge, OverlapMerge, ReconciliationEngine};
use streamchat_rs::stream::ChunkDecoder;

fn prose(len: usize) -> String {
    "The quick brown fox jumps over the lazy dog. "
        .chars()
        .cycle()
        .take(len)
        .collect()
}

fn sse_body(fragments: usize) -> Vec<u8> {
    let mut body = String::new();
    for idx in 0..fragments {
        body.push_str(&format!(
            "data: {{\"type\":\"content\",\"text\":\"token {idx} \"}}\n\n"
        ));
    }
    body.push_str("data: {\"type\":\"finish\",\"reason\":\"stop\"}\n\ndata: [DONE]\n\n");
    body.into_bytes()
}

fn bench_decode(c: &mut Criterion) {
    let content = r#"{"type":"content","text":"hello world","output_type":"text"}"#;
    c.bench_function("decode_content_event", |b| {
        b.iter(|| black_box(decode(black_box(content))));
    });

    let tool_call = r#"{"type":"tool_call","id":"t1","name":"search","argumentsObj":{"q":"rust streams"}}"#;
    c.bench_function("decode_tool_call_event", |b| {
        b.iter(|| black_box(decode(black_box(tool_call))));
    });

    let ndjson = "{\"type\":\"text\",\"text\":\"a\"}\n{\"type\":\"text\",\"text\":\"b\"}\n{\"type\":\"finish\",\"reason\":\"stop\"}";
    c.bench_function("decode_chunk_ndjson_fallback_3", |b| {
        b.iter(|| black_box(decode_chunk(black_box(ndjson))));
    });
}

fn bench_chunk_decoder(c: &mut Criterion) {
    let body = sse_body(256);

    c.bench_function("chunk_decoder_sse_256_single_push", |b| {
        b.iter(|| {
            let mut decoder = ChunkDecoder::new();
            let mut out = VecDeque::new();
            decoder.push(black_box(&body), &mut out);
            decoder.finish(&mut out);
            black_box(out.len())
        });
    });

    c.bench_function("chunk_decoder_sse_256_split_64b", |b| {
        b.iter(|| {
            let mut decoder = ChunkDecoder::new();
            let mut out = VecDeque::new();
            for piece in body.chunks(64) {
                decoder.push(black_box(piece), &mut out);
            }
            decoder.finish(&mut out);
            black_box(out.len())
        });
    });
}

fn bench_merge(c: &mut Criterion) {
    let buffer = prose(4096);
    let snapshot = format!("{buffer}and then some more");
    c.bench_function("merge_decide_snapshot_4k", |b| {
        b.iter(|| black_box(decide_merge(black_box(&buffer), black_box(&snapshot), 512)));
    });

    let tail: String = buffer.chars().rev().take(40).collect::<Vec<_>>().into_iter().rev().collect();
    let overlapping = format!("{tail} continues here");
    c.bench_function("merge_decide_overlap_4k", |b| {
        b.iter(|| black_box(decide_merge(black_box(&buffer), black_box(&overlapping), 512)));
    });

    let delta = "a fresh delta with no overlap at all";
    c.bench_function("merge_decide_append_4k", |b| {
        b.iter(|| black_box(decide_merge(black_box(&buffer), black_box(delta), 512)));
    });
}

fn bench_engine(c: &mut Criterion) {
    let deltas: Vec<StreamEvent> = (0..256)
        .map(|idx| StreamEvent::text(format!("token {idx} ")))
        .collect();
    c.bench_function("engine_apply_deltas_256", |b| {
        b.iter(|| {
            let mut engine: ReconciliationEngine<OverlapMerge> = ReconciliationEngine::new();
            for event in &deltas {
                black_box(engine.apply("m", event));
            }
            black_box(engine.current_text("m").len())
        });
    });

    let text = prose(2048);
    let snapshots: Vec<StreamEvent> = (1..=64)
        .map(|step| {
            let end = text.len() * step / 64;
            StreamEvent::text(text[..end].to_string())
        })
        .collect();
    c.bench_function("engine_apply_snapshots_64", |b| {
        b.iter(|| {
            let mut engine: ReconciliationEngine<OverlapMerge> = ReconciliationEngine::new();
            for event in &snapshots {
                black_box(engine.apply("m", event));
            }
            black_box(engine.current_text("m").len())
        });
    });
}

criterion_group!(
    benches,
    bench_decode,
    bench_chunk_decoder,
    bench_merge,
    bench_engine
);
criterion_main!(benches);
