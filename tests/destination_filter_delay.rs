//! A destination filter hosted on a third core, wired onto an endpoint that lives on a second
//! core, adds its configured delay to a message sent from a first core -- exercising the
//! cross-core filter round trip (`SEND_FOR_DEST_FILTER_AND_RETURN`/`DEST_FILTER_RESULT`) end to
//! end, including that a federate's own time requests keep resolving once the round trip settles.

use std::time::Duration;

use cosim::{
    Broker, BrokerConfig, Core, CoreConfig, FederateInfo, FilterOperator, FilterPlacement,
    HandleKind, Time,
};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn destination_filter_delay_across_cores() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let _root = Broker::spawn(BrokerConfig::builder().name("filter_delay_root").build());
    settle().await;

    let core_a = Core::spawn(
        CoreConfig::builder()
            .name("filter_delay_core_a")
            .parent("filter_delay_root")
            .build(),
    );
    let core_b = Core::spawn(
        CoreConfig::builder()
            .name("filter_delay_core_b")
            .parent("filter_delay_root")
            .build(),
    );
    let core_c = Core::spawn(
        CoreConfig::builder()
            .name("filter_delay_core_c")
            .parent("filter_delay_root")
            .build(),
    );
    settle().await;

    let fed_a = core_a
        .register_federate(FederateInfo::new("fed_a"))
        .await
        .expect("fed_a registers");
    let fed_b = core_b
        .register_federate(FederateInfo::new("fed_b"))
        .await
        .expect("fed_b registers");
    let fed_c = core_c
        .register_federate(FederateInfo::new("fed_c"))
        .await
        .expect("fed_c registers");

    let ep_a = core_a
        .register_interface(fed_a, HandleKind::Endpoint, "fed_a/ep", "string", "")
        .await
        .expect("sender endpoint registers");
    let ep_b = core_b
        .register_interface(fed_b, HandleKind::Endpoint, "fed_b/ep", "string", "")
        .await
        .expect("receiver endpoint registers");
    let filt = core_c
        .register_interface(fed_c, HandleKind::Filter, "fed_c/filt", "string", "")
        .await
        .expect("filter registers");
    settle().await;

    core_c
        .add_target(filt, "fed_b/ep", Some(FilterPlacement::Destination))
        .await
        .expect("filter wires onto the remote endpoint");
    core_c
        .set_filter_operator(filt, Box::new(|payload: &[u8]| Some(payload.to_vec())) as Box<dyn FilterOperator>)
        .await
        .expect("filter operator installs");
    core_c
        .set_filter_delay(filt, Time::from_seconds(0.5))
        .expect("filter delay sets");
    settle().await;

    let (grant_a, grant_b, grant_c) = tokio::join!(
        core_a.enter_executing_mode(fed_a, false),
        core_b.enter_executing_mode(fed_b, false),
        core_c.enter_executing_mode(fed_c, false),
    );
    grant_a.expect("fed_a enters executing mode");
    grant_b.expect("fed_b enters executing mode");
    grant_c.expect("fed_c enters executing mode");

    let send_time = Time::from_seconds(1.0);
    core_a
        .send_message(fed_a, ep_a, "fed_b/ep", b"across the filter".to_vec(), Some(send_time))
        .expect("fed_a sends");
    settle().await;
    settle().await;

    let (arrival, payload) = core_b
        .get_message(fed_b, ep_b)
        .await
        .expect("fed_b receives the filtered message");
    assert_eq!(payload, b"across the filter");
    assert_eq!(arrival, send_time + Time::from_seconds(0.5));

    // The round trip must fully settle: a subsequent time request for the sender still resolves
    // rather than hanging on a grant withheld in `blocked_grants`.
    let later = core_a
        .time_request(fed_a, Time::from_seconds(2.0), false)
        .await
        .expect("fed_a's time request still grants after the filter round trip");
    assert_eq!(later.granted_time, Time::from_seconds(2.0));
}
