//! A publication on one core's federate reaches an input on another core's federate across the
//! broker, and both federates are granted entry to executing mode only once the other has asked.

use std::time::Duration;

use cosim::{Broker, BrokerConfig, Core, CoreConfig, FederateInfo, HandleKind, Time};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn two_federate_value_exchange() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let _root = Broker::spawn(BrokerConfig::builder().name("value_exchange_root").build());
    settle().await;

    let core_a = Core::spawn(
        CoreConfig::builder()
            .name("value_exchange_core_a")
            .parent("value_exchange_root")
            .build(),
    );
    let core_b = Core::spawn(
        CoreConfig::builder()
            .name("value_exchange_core_b")
            .parent("value_exchange_root")
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

    let out = core_a
        .register_interface(fed_a, HandleKind::Publication, "fed_a/out", "string", "")
        .await
        .expect("publication registers");
    let inp = core_b
        .register_interface(fed_b, HandleKind::Input, "fed_b/in", "string", "")
        .await
        .expect("input registers");
    settle().await;

    core_b
        .add_target(inp, "fed_a/out", None)
        .await
        .expect("add_target accepted");
    settle().await;

    let (grant_a, grant_b) = tokio::join!(
        core_a.enter_executing_mode(fed_a, false),
        core_b.enter_executing_mode(fed_b, false),
    );
    grant_a.expect("fed_a enters executing mode");
    grant_b.expect("fed_b enters executing mode");

    core_a.set_value(fed_a, out, b"hello".to_vec()).unwrap();
    settle().await;

    let received = core_b.get_input(fed_b, inp).await;
    assert_eq!(received, Some(b"hello".to_vec()));

    let (grant_a, grant_b) = tokio::join!(
        core_a.time_request(fed_a, Time::from_seconds(1.0), false),
        core_b.time_request(fed_b, Time::from_seconds(1.0), false),
    );
    assert_eq!(grant_a.expect("fed_a's time request grants").granted_time, Time::from_seconds(1.0));
    assert_eq!(grant_b.expect("fed_b's time request grants").granted_time, Time::from_seconds(1.0));
}
