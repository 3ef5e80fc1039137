use integration_tests::sim_link::{LinkCommand, SimLink};
use tugboat_canbus::kernel::{bring_up, LinkError, LinkTransition};

fn down(name: &str) -> LinkCommand {
    LinkCommand::Down(name.to_string())
}

fn up(name: &str, bit_rate: u32) -> LinkCommand {
    LinkCommand::Up(name.to_string(), bit_rate)
}

#[tokio::test]
async fn test_link_already_configured() {
    let link = SimLink::new();
    link.add_can_link("can0", true, Some(250_000));

    let transition = bring_up(&link, "can0", 250_000, false).await.unwrap();
    assert_eq!(LinkTransition::Unchanged, transition);
    assert!(link.commands().is_empty());

    // Repeating is still a no-op
    bring_up(&link, "can0", 250_000, false).await.unwrap();
    assert!(link.commands().is_empty());
}

#[tokio::test]
async fn test_link_wrong_bit_rate() {
    let link = SimLink::new();
    link.add_can_link("can0", true, Some(500_000));

    let transition = bring_up(&link, "can0", 250_000, false).await.unwrap();
    assert_eq!(LinkTransition::Bounced, transition);
    assert_eq!(vec![down("can0"), up("can0", 250_000)], link.commands());

    let state = link.state("can0").unwrap();
    assert!(state.is_up);
    assert_eq!(Some(250_000), state.bit_rate);
}

#[tokio::test]
async fn test_link_force_bounce() {
    let link = SimLink::new();
    link.add_can_link("can0", true, Some(250_000));

    let transition = bring_up(&link, "can0", 250_000, true).await.unwrap();
    assert_eq!(LinkTransition::Bounced, transition);
    assert_eq!(vec![down("can0"), up("can0", 250_000)], link.commands());
}

#[tokio::test]
async fn test_link_down() {
    let link = SimLink::new();
    link.add_can_link("can1", false, None);

    let transition = bring_up(&link, "can1", 125_000, false).await.unwrap();
    assert_eq!(LinkTransition::BroughtUp, transition);
    assert_eq!(vec![up("can1", 125_000)], link.commands());
}

#[tokio::test]
async fn test_link_missing() {
    let link = SimLink::new();
    link.add_can_link("can0", true, Some(250_000));

    let err = bring_up(&link, "can9", 250_000, false).await.unwrap_err();
    assert!(matches!(err, LinkError::NotFound { ref name, .. } if name == "can9"));
    assert!(link.commands().is_empty());
}

#[tokio::test]
async fn test_link_not_can() {
    let link = SimLink::new();
    link.add_link("vcan0", "vcan", true, None);
    link.add_link("eth0", "veth", false, None);

    let err = bring_up(&link, "vcan0", 250_000, false).await.unwrap_err();
    assert!(matches!(err, LinkError::InvalidKind { ref kind, .. } if kind == "vcan"));
    let err = bring_up(&link, "eth0", 250_000, false).await.unwrap_err();
    assert!(matches!(err, LinkError::InvalidKind { .. }));
    assert!(link.commands().is_empty());
}

#[tokio::test]
async fn test_link_down_fails() {
    let link = SimLink::new();
    link.add_can_link("can0", true, Some(500_000));
    link.fail_down();

    let err = bring_up(&link, "can0", 250_000, false).await.unwrap_err();
    assert!(matches!(err, LinkError::CommandFailed { .. }));
    // No attempt to bring the link up after the failure
    assert_eq!(vec![down("can0")], link.commands());
    assert_eq!(Some(500_000), link.state("can0").unwrap().bit_rate);
}

#[tokio::test]
async fn test_link_still_up() {
    let link = SimLink::new();
    link.add_can_link("can0", true, Some(500_000));
    link.ignore_down();

    let err = bring_up(&link, "can0", 250_000, false).await.unwrap_err();
    assert!(matches!(err, LinkError::StillUp { .. }));
    assert_eq!(vec![down("can0")], link.commands());
}

#[tokio::test]
async fn test_link_up_fails() {
    let link = SimLink::new();
    link.add_can_link("can0", false, None);
    link.fail_up();

    let err = bring_up(&link, "can0", 250_000, false).await.unwrap_err();
    assert!(matches!(err, LinkError::CommandFailed { ref stderr, .. } if stderr.contains("RTNETLINK")));
    assert_eq!(vec![up("can0", 250_000)], link.commands());
}
