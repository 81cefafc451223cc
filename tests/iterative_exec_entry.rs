//! Two federates sharing a core request iterative entry to executing mode. Each keeps
//! re-asserting until told the iteration is complete, and with `max_iteration_count` capped at
//! three the convergence genuinely takes more than one round for at least one of them before the
//! cap forces completion.

use std::time::Duration;

use cosim::{Broker, BrokerConfig, Core, CoreConfig, CoreHandle, FederateInfo, LocalFederateId};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Re-asserts `federate`'s iterative exec-entry request until the coordinator reports
/// convergence, returning how many rounds that took.
async fn converge(core: &CoreHandle, federate: LocalFederateId) -> usize {
    for round in 1..=20 {
        let result = core
            .enter_executing_mode(federate, true)
            .await
            .expect("iterative exec entry keeps granting each round");
        if result.iteration_complete {
            return round;
        }
    }
    panic!("iterative exec entry never converged within 20 rounds");
}

#[tokio::test]
async fn iterative_exec_entry_converges_within_iteration_cap() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let _root = Broker::spawn(BrokerConfig::builder().name("iterative_exec_root").build());
    settle().await;

    let core = Core::spawn(
        CoreConfig::builder()
            .name("iterative_exec_core")
            .parent("iterative_exec_root")
            .max_iteration_count(3)
            .build(),
    );
    settle().await;

    let fed_one = core
        .register_federate(FederateInfo::new("fed_one"))
        .await
        .expect("fed_one registers");
    let fed_two = core
        .register_federate(FederateInfo::new("fed_two"))
        .await
        .expect("fed_two registers");
    settle().await;

    let (rounds_one, rounds_two) = tokio::join!(converge(&core, fed_one), converge(&core, fed_two));

    assert!(rounds_one <= 3);
    assert!(rounds_two <= 3);
    assert!(
        rounds_one > 1 || rounds_two > 1,
        "expected genuine convergence across more than one round, got {rounds_one} and {rounds_two}"
    );
}
