//! A `federate_map` query issued from one core fans out through the broker to every sibling core
//! and comes back as one fused object naming every hosted federate exactly once.

use std::time::Duration;

use cosim::{Broker, BrokerConfig, Core, CoreConfig, FederateInfo};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn query_federate_map_fans_out_across_cores() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let _root = Broker::spawn(BrokerConfig::builder().name("query_map_root").build());
    settle().await;

    let core_x = Core::spawn(
        CoreConfig::builder()
            .name("query_map_core_x")
            .parent("query_map_root")
            .build(),
    );
    let core_y = Core::spawn(
        CoreConfig::builder()
            .name("query_map_core_y")
            .parent("query_map_root")
            .build(),
    );
    settle().await;

    core_x
        .register_federate(FederateInfo::new("fed_x"))
        .await
        .expect("fed_x registers");
    core_y
        .register_federate(FederateInfo::new("fed_y"))
        .await
        .expect("fed_y registers");
    settle().await;

    let answer = core_x.query("federate_map").await.expect("federate_map query answers");

    assert!(answer.contains("query_map_root"));
    assert!(answer.contains("query_map_core_x"));
    assert!(answer.contains("query_map_core_y"));
    assert!(answer.contains("fed_x"));
    assert!(answer.contains("fed_y"));
    assert_eq!(answer.matches("fed_x").count(), 1);
    assert_eq!(answer.matches("fed_y").count(), 1);
}
