//! Benchmarks for the QENG response parsers.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use quectel_tower::parser::{looks_like_qeng, parse_neighbor, parse_serving};

const SERVING_LINE: &str =
    r#"+QENG: "servingcell","NOCONN","LTE","FDD",262,02,1A2B3C,5,5,1,1,1,64,-95"#;

/// Sample neighbor lines for benchmarking.
const NEIGHBOR_LINES: &[&str] = &[
    r#"+QENG: "neighbourcell intra","LTE",6300,128,-11,-101,-72,0,20,7,-,-,-,-"#,
    r#"+QENG: "neighbourcell intra","LTE",6300,77,-14,-108,-80,0,12,7,-,-,-,-"#,
    r#"+QENG: "neighbourcell inter","LTE",1300,301,-15,-112,-85,0,6,7,-,-,-,-"#,
    r#"+QENG: "neighbourcell inter","LTE",3750,12,-9,-97,-66,0,24,7,-,-,-,-"#,
    r#"+QENG: "neighbourcell intra","CAT-M",2525,45,-12,-104,-75,0,15,7,-,-,-,-"#,
];

fn bench_parse_serving(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_serving");

    group.throughput(Throughput::Elements(1));
    group.bench_function("lte", |b| b.iter(|| parse_serving(black_box(SERVING_LINE))));

    group.bench_function("truncated", |b| {
        b.iter(|| parse_serving(black_box(r#"+QENG: "servingcell","NOCONN","LTE""#)))
    });

    group.finish();
}

fn bench_parse_neighbor(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_neighbor");

    group.throughput(Throughput::Elements(NEIGHBOR_LINES.len() as u64));
    group.bench_function("batch", |b| {
        b.iter(|| {
            for line in NEIGHBOR_LINES {
                let _ = parse_neighbor(black_box(line));
            }
        })
    });

    group.finish();
}

fn bench_full_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_scan");

    // One scan's worth of modem output, including noise
    let mut lines = vec![SERVING_LINE, "", "+CEREG: 5"];
    lines.extend_from_slice(NEIGHBOR_LINES);

    group.throughput(Throughput::Elements(lines.len() as u64));
    group.bench_function("mixed_input", |b| {
        b.iter(|| {
            let _ = parse_serving(black_box(lines[0]));
            for line in &lines[1..] {
                if looks_like_qeng(line) {
                    let _ = parse_neighbor(black_box(line));
                }
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse_serving,
    bench_parse_neighbor,
    bench_full_scan
);
criterion_main!(benches);
