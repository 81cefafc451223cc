//! A required input whose target name never resolves surfaces as a registration-failure error
//! through `enter_executing_mode`'s return value, rather than hanging or being silently dropped.

use std::time::Duration;

use cosim::{Broker, BrokerConfig, Core, CoreConfig, ErrorKind, FederateInfo, HandleKind};

#[tokio::test]
async fn required_subscription_missing_fails_enter_executing_mode() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let _root = Broker::spawn(BrokerConfig::builder().name("missing_target_root").build());
    tokio::time::sleep(Duration::from_millis(30)).await;

    let core_b = Core::spawn(
        CoreConfig::builder()
            .name("missing_target_core_b")
            .parent("missing_target_root")
            .build(),
    );
    tokio::time::sleep(Duration::from_millis(30)).await;

    let fed_b = core_b
        .register_federate(FederateInfo::new("fed_b"))
        .await
        .expect("fed_b registers");
    let inp = core_b
        .register_interface(fed_b, HandleKind::Input, "fed_b/missing", "string", "")
        .await
        .expect("input registers");
    core_b.set_option(inp, true, false).expect("marks input required");
    core_b
        .add_target(inp, "nobody/publishes/this", None)
        .await
        .expect("add_target accepted even though unresolved");

    let result = core_b.enter_executing_mode(fed_b, false).await;
    let err = result.expect_err("entering executing mode must fail for an unresolved required target");
    assert_eq!(err.kind(), ErrorKind::RegistrationFailure);
}
