//! Two endpoints on separate cores exchange a bounded round-trip of messages, each reply timed
//! strictly later than the request that provoked it -- a basic regression check that endpoint
//! delivery and repeated `time_request` grants keep advancing monotonically across a broker hop.

use std::time::Duration;

use cosim::{Broker, BrokerConfig, Core, CoreConfig, FederateInfo, HandleKind, Time};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn ping_pong_messaging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let _root = Broker::spawn(BrokerConfig::builder().name("ping_pong_root").build());
    settle().await;

    let core_ping = Core::spawn(
        CoreConfig::builder()
            .name("ping_pong_core_ping")
            .parent("ping_pong_root")
            .build(),
    );
    let core_pong = Core::spawn(
        CoreConfig::builder()
            .name("ping_pong_core_pong")
            .parent("ping_pong_root")
            .build(),
    );
    settle().await;

    let fed_ping = core_ping
        .register_federate(FederateInfo::new("fed_ping"))
        .await
        .expect("fed_ping registers");
    let fed_pong = core_pong
        .register_federate(FederateInfo::new("fed_pong"))
        .await
        .expect("fed_pong registers");

    let ep_ping = core_ping
        .register_interface(fed_ping, HandleKind::Endpoint, "fed_ping/ep", "string", "")
        .await
        .expect("ping endpoint registers");
    let ep_pong = core_pong
        .register_interface(fed_pong, HandleKind::Endpoint, "fed_pong/ep", "string", "")
        .await
        .expect("pong endpoint registers");
    settle().await;

    let (grant_ping, grant_pong) = tokio::join!(
        core_ping.enter_executing_mode(fed_ping, false),
        core_pong.enter_executing_mode(fed_pong, false),
    );
    grant_ping.expect("fed_ping enters executing mode");
    grant_pong.expect("fed_pong enters executing mode");

    let rounds = 10usize;
    let payload = vec![b'x'; 110];
    let mut last_ping_grant = Time::ZERO;
    let mut last_pong_grant = Time::ZERO;

    for round in 0..rounds {
        let send_time = Time::from_seconds(round as f64);
        core_ping
            .send_message(fed_ping, ep_ping, "fed_pong/ep", payload.clone(), Some(send_time))
            .expect("ping sends");
        settle().await;

        let (time, received) = core_pong
            .get_message(fed_pong, ep_pong)
            .await
            .expect("pong receives ping's message");
        assert_eq!(received, payload);
        assert_eq!(time, send_time);

        let reply_time = send_time + Time::from_seconds(0.5);
        core_pong
            .send_message(fed_pong, ep_pong, "fed_ping/ep", payload.clone(), Some(reply_time))
            .expect("pong replies");
        settle().await;

        let (time, received) = core_ping
            .get_message(fed_ping, ep_ping)
            .await
            .expect("ping receives pong's reply");
        assert_eq!(received, payload);
        assert_eq!(time, reply_time);

        let grant_ping = core_ping
            .time_request(fed_ping, reply_time, false)
            .await
            .expect("ping's time request grants");
        let grant_pong = core_pong
            .time_request(fed_pong, reply_time, false)
            .await
            .expect("pong's time request grants");

        assert!(grant_ping.granted_time >= last_ping_grant);
        assert!(grant_pong.granted_time >= last_pong_grant);
        last_ping_grant = grant_ping.granted_time;
        last_pong_grant = grant_pong.granted_time;
    }

    assert_eq!(last_ping_grant, Time::from_seconds((rounds - 1) as f64 + 0.5));
}
