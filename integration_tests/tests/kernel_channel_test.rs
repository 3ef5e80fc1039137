#![cfg(target_os = "linux")]

use std::sync::Arc;

use integration_tests::sim_link::{LinkCommand, SimLink};
use tugboat_canbus::{
    kernel::LinkError, Channel, Frame, KernelCanChannel, KernelChannelError, KernelChannelOptions,
};

#[tokio::test]
async fn test_run_missing_interface() {
    let link = SimLink::new();
    let channel =
        KernelCanChannel::with_link_control(KernelChannelOptions::new("can7"), link.clone(), |_| {});

    let err = channel.run().await.unwrap_err();
    assert!(matches!(
        err,
        KernelChannelError::Link {
            source: LinkError::NotFound { .. },
            ..
        }
    ));
    assert!(link.commands().is_empty());
}

#[tokio::test]
async fn test_run_rejects_virtual_interface() {
    let link = SimLink::new();
    link.add_link("vcan0", "vcan", true, None);
    let channel = KernelCanChannel::with_link_control(
        KernelChannelOptions::new("vcan0"),
        link.clone(),
        |_| {},
    );

    let err = channel.run().await.unwrap_err();
    assert!(matches!(
        err,
        KernelChannelError::Link {
            source: LinkError::InvalidKind { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_run_brings_link_up_before_opening() {
    // The simulated link does not exist in the kernel, so opening the socket fails after the link
    // has been configured
    let link = SimLink::new();
    link.add_can_link("tugsim0", true, Some(1_000_000));
    let options = KernelChannelOptions {
        bit_rate: 500_000,
        ..KernelChannelOptions::new("tugsim0")
    };
    let channel = KernelCanChannel::with_link_control(options, link.clone(), |_| {});

    let err = channel.run().await.unwrap_err();
    assert!(matches!(err, KernelChannelError::Open { .. }));
    assert_eq!(
        vec![
            LinkCommand::Down("tugsim0".into()),
            LinkCommand::Up("tugsim0".into(), 500_000)
        ],
        link.commands()
    );

    // The failed run leaves nothing open
    let err = channel.write_frame(Frame::new(1, &[])).await.unwrap_err();
    assert!(matches!(err, KernelChannelError::NotOpen));
}

#[tokio::test]
async fn test_second_run_leaves_link_alone() {
    let link = SimLink::new();
    link.add_can_link("tugsim1", true, Some(250_000));
    link.hold_queries();
    let options = KernelChannelOptions {
        force_bounce: true,
        ..KernelChannelOptions::new("tugsim1")
    };
    let channel = Arc::new(KernelCanChannel::with_link_control(
        options,
        link.clone(),
        |_| {},
    ));

    let runner = channel.clone();
    let first = tokio::spawn(async move { runner.run().await });
    while link.query_count() == 0 {
        tokio::task::yield_now().await;
    }

    // The first run is still bringing the link up
    let err = channel.run().await.unwrap_err();
    assert!(matches!(err, KernelChannelError::AlreadyRunning));
    assert_eq!(1, link.query_count());
    assert!(link.commands().is_empty());

    // Closing during bring-up stops the first run before it bounces the link
    channel.close().await.unwrap();
    assert!(matches!(
        first.await.unwrap(),
        Err(KernelChannelError::Closed)
    ));
    link.release_queries();
    assert!(link.commands().is_empty());
}
