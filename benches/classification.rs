use atalaya::backends::cache::info::{ClusterNode, ServerInfo};
use atalaya::backends::cache::resp::{RespEncoder, RespParser, RespValue};
use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn info_text(replicas: usize) -> String {
    let mut text = String::from(
        "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\nuptime_in_seconds:86400\r\n\
         # Replication\r\nrole:master\r\n",
    );
    text.push_str(&format!("connected_slaves:{}\r\n", replicas));
    for i in 0..replicas {
        text.push_str(&format!(
            "slave{}:ip=10.0.{}.{},port=6379,state=online,offset={},lag=0\r\n",
            i,
            i / 250,
            i % 250,
            1000 + i
        ));
    }
    text.push_str("# Cluster\r\ncluster_enabled:0\r\n");
    text
}

fn cluster_nodes_text(nodes: usize) -> String {
    (0..nodes)
        .map(|i| {
            let role = if i % 2 == 0 { "master" } else { "slave" };
            format!(
                "{:040x} 10.0.0.{}:7000@17000 {} - 0 1700000000000 {} connected\n",
                i,
                i % 250,
                role,
                i
            )
        })
        .collect()
}

/// INFO parsing
fn bench_server_info(c: &mut Criterion) {
    let mut group = c.benchmark_group("server_info");

    for replicas in [0usize, 4, 64].iter() {
        let text = info_text(*replicas);
        group.bench_with_input(BenchmarkId::new("parse", replicas), &text, |b, text| {
            b.iter(|| black_box(ServerInfo::parse(text)));
        });
    }

    group.finish();
}

/// CLUSTER NODES parsing
fn bench_cluster_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster_nodes");

    for nodes in [6usize, 60, 600].iter() {
        let text = cluster_nodes_text(*nodes);
        group.bench_with_input(BenchmarkId::new("parse_all", nodes), &text, |b, text| {
            b.iter(|| {
                let members: Vec<_> = ClusterNode::parse_all(text)
                    .iter()
                    .map(ClusterNode::to_member)
                    .collect();
                black_box(members)
            });
        });
    }

    group.finish();
}

/// RESP decoding of a bulk INFO reply
fn bench_resp(c: &mut Criterion) {
    let reply = RespValue::BulkString(Some(Bytes::from(info_text(16))));
    let encoded = RespEncoder::encode(&reply);

    c.bench_function("resp_parse_bulk", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&encoded[..]);
            black_box(RespParser::parse(&mut buf).unwrap())
        });
    });

    c.bench_function("resp_create_command", |b| {
        b.iter(|| black_box(RespEncoder::create_command("SENTINEL", &["get-master-addr-by-name", "mymaster"])));
    });
}

criterion_group!(benches, bench_server_info, bench_cluster_nodes, bench_resp);
criterion_main!(benches);
