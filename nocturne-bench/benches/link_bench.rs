//! End-to-end orchestrator benchmarks over the loopback transport.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nocturne_link::{ChannelId, Config, Orchestrator, PeerId};
use nocturne_peer::{LoopbackTransport, PeerMirror};
use nocturne_protocol::Features;
use nocturne_transfer::{Asset, AssetClass};
use std::time::Duration;
use tokio::runtime::Runtime;

struct TestSetup {
    orch: Orchestrator<LoopbackTransport>,
    peer: PeerId,
    _scheduler: tokio::task::JoinHandle<()>,
}

fn setup(rt: &Runtime, mtu: u16) -> TestSetup {
    let mut config = Config::default();
    config.queue.bulk_interval_ms = 0;
    config.queue.normal_interval_ms = 0;

    let link = LoopbackTransport::new(Duration::ZERO);
    let orch = Orchestrator::new(config, link.clone()).unwrap();
    let peer = PeerId::from("bench");

    // Without feedback the transfer completes when the end frame is sent.
    let features = Features::new()
        .with(Features::BINARY_PROTOCOL)
        .with(Features::ALBUM_ART)
        .with(Features::COMPRESSION);
    let mirror = PeerMirror::new(features, mtu);
    let handshake = mirror.handshake().unwrap();
    link.attach(peer.clone(), mirror);

    let _scheduler = rt.block_on(async { orch.start() });
    orch.on_peer_connected(peer.clone());
    orch.on_mtu_changed(&peer, mtu);
    orch.on_subscription_changed(&peer, ChannelId::Bulk, true);
    orch.handle_inbound(&peer, ChannelId::Command, &handshake);

    TestSetup {
        orch,
        peer,
        _scheduler,
    }
}

fn bench_send_asset(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("send_asset");
    let data = vec![0xA5u8; 50_000];

    for mtu in [185u16, 517] {
        let setup = setup(&rt, mtu);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(mtu), &data, |b, data| {
            b.to_async(&rt).iter(|| async {
                let asset = Asset::new(AssetClass::AlbumArt, "bench", data.clone());
                black_box(setup.orch.send_asset(&setup.peer, asset).await.unwrap())
            });
        });
        setup.orch.shutdown();
    }

    group.finish();
}

criterion_group!(benches, bench_send_asset);
criterion_main!(benches);
