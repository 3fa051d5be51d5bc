use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use ai_relay::cache::{compute_fingerprint, FingerprintInput};
use ai_relay::protocol::{encode, FinishReason, ProtocolEvent};
use ai_relay::provider::ToolCallFragment;
use ai_relay::stream::{SseParser, ToolCallAssembler};

fn bench_encode(c: &mut Criterion) {
    let short = ProtocolEvent::Text("Hello".to_string());
    let escaped = ProtocolEvent::Text("line \"one\"\n\tline two \u{1F600} ".repeat(32));
    let finish = ProtocolEvent::FinishMessage {
        reason: FinishReason::Stop,
        prompt_tokens: 1_234,
        completion_tokens: 567,
    };
    let tool_call = ProtocolEvent::ToolCall {
        id: "call_abc123".to_string(),
        name: "get_weather".to_string(),
        arguments_json: r#"{"city":"Paris","unit":"celsius"}"#.to_string(),
    };

    c.bench_function("encode_text_short", |b| {
        b.iter(|| black_box(encode(black_box(&short))));
    });
    c.bench_function("encode_text_escaped_1k", |b| {
        b.iter(|| black_box(encode(black_box(&escaped))));
    });
    c.bench_function("encode_finish", |b| {
        b.iter(|| black_box(encode(black_box(&finish))));
    });
    c.bench_function("encode_tool_call", |b| {
        b.iter(|| black_box(encode(black_box(&tool_call))));
    });
}

fn bench_assembler(c: &mut Criterion) {
    let mut fragments = Vec::with_capacity(66);
    fragments.push(ToolCallFragment::start(Some("call_1"), "search"));
    fragments.push(ToolCallFragment::arguments("{\"query\":\""));
    for _ in 0..64 {
        fragments.push(ToolCallFragment::arguments("token "));
    }
    fragments.push(ToolCallFragment::arguments("\"}"));

    c.bench_function("assemble_one_call_64_fragments", |b| {
        b.iter(|| {
            let mut assembler = ToolCallAssembler::new();
            for fragment in &fragments {
                assembler.push(black_box(fragment));
            }
            black_box(assembler.finish())
        });
    });

    c.bench_function("assemble_eight_calls_synthetic_ids", |b| {
        b.iter(|| {
            let mut assembler = ToolCallAssembler::new();
            for _ in 0..8 {
                assembler.push(&ToolCallFragment::start(None, "lookup"));
                assembler.push(&ToolCallFragment::arguments("{\"id\":42}"));
            }
            black_box(assembler.finish())
        });
    });
}

fn bench_sse_parser(c: &mut Criterion) {
    let mut body = String::new();
    for index in 0..64 {
        body.push_str(&format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"tok{index}\"}}}}]}}\n\n"
        ));
    }
    body.push_str("data: [DONE]\n\n");
    let chunks: Vec<&str> = body
        .as_bytes()
        .chunks(97)
        .map(|chunk| std::str::from_utf8(chunk).unwrap())
        .collect();

    c.bench_function("sse_parse_64_events_split_97", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            let mut out = Vec::with_capacity(65);
            for chunk in &chunks {
                parser.feed_into(black_box(chunk), &mut out);
            }
            parser.finish_into(&mut out);
            black_box(out.len())
        });
    });
}

fn bench_fingerprint(c: &mut Criterion) {
    let messages: Vec<_> = (0..16)
        .map(|index| {
            json!({
                "role": if index % 2 == 0 { "user" } else { "assistant" },
                "content": format!("message number {index} with some text"),
            })
        })
        .collect();
    let tools = vec![json!({
        "type": "function",
        "function": {
            "name": "get_weather",
            "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
        }
    })];
    let input = FingerprintInput {
        model: "gpt-4o",
        messages: &messages,
        system: Some("be brief"),
        tools: Some(&tools),
        temperature: Some(0.7),
        ..FingerprintInput::default()
    };

    c.bench_function("fingerprint_16_messages_1_tool", |b| {
        b.iter(|| black_box(compute_fingerprint(black_box(&input))));
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_assembler,
    bench_sse_parser,
    bench_fingerprint
);
criterion_main!(benches);
