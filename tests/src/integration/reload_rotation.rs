//! # Reload Rotation Tests
//!
//! Zero-downtime bus-connection rotation:
//!
//! ```text
//! refresh_singleton("bus", ...) ─▶ service listener: RELOADING
//!                                  monitor: shutdown + ack READY
//!                                  container swaps the connection
//!                                  service listener: RELOADED
//!                                  monitor: configure(true) + start
//! ```
//!
//! The rotation moves services from one bus instance to another, which
//! makes "stale connection" observable: after the swap the old bus must
//! have no subscribers left on the service subject.

#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::time::{Duration, Instant};

#[cfg(test)]
use quasar_bus::{BusConnection, Envelope, Headers, InMemoryBus};
#[cfg(test)]
use quasar_codec::BincodeCodec;
#[cfg(test)]
use quasar_container::Container;
#[cfg(test)]
use quasar_runtime::Bootstrapper;
#[cfg(test)]
use quasar_service::{status, RpcService, Service};

#[cfg(test)]
async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[cfg(test)]
fn counting_service(
    container: &Arc<Container>,
    subject: &str,
    calls: &Arc<AtomicUsize>,
) -> RpcService<Vec<u8>, Vec<u8>, BincodeCodec> {
    let calls = Arc::clone(calls);
    RpcService::new(
        Arc::clone(container),
        "bus",
        subject,
        "workers",
        BincodeCodec,
        move |request: Vec<u8>| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(request)
            }
        },
    )
}

#[cfg(test)]
async fn echo_request(bus: &Arc<InMemoryBus>, subject: &str) -> Envelope {
    let client = BusConnection::connect(bus);
    let payload = bincode::serialize(&vec![1u8]).unwrap();
    client
        .request(subject, Headers::new(), payload, Duration::from_secs(1))
        .await
        .expect("reply")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rotation_unsubscribes_before_swap_and_resubscribes_after() {
        let old_bus = InMemoryBus::new();
        let new_bus = InMemoryBus::new();

        let container = Arc::new(Container::new());
        {
            let bus = Arc::clone(&old_bus);
            container
                .register_singleton("bus", move || Ok(BusConnection::connect(&bus)))
                .unwrap();
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let mut bootstrapper = Bootstrapper::new();
        bootstrapper.register(Arc::new(counting_service(&container, "svc.rotate", &calls)));
        bootstrapper.bootstrap().await.unwrap();

        let reply = echo_request(&old_bus, "svc.rotate").await;
        assert_eq!(reply.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Probe listener registered after the service's own listener, so
        // it runs once the service has already quiesced: anything
        // published on the old bus mid-swap must find no subscribers.
        let stale_deliveries = Arc::new(AtomicUsize::new(0));
        {
            let old_bus = Arc::clone(&old_bus);
            let stale_deliveries = Arc::clone(&stale_deliveries);
            container.on_refresh(
                "bus",
                Arc::new(move |event| {
                    let old_bus = Arc::clone(&old_bus);
                    let stale_deliveries = Arc::clone(&stale_deliveries);
                    Box::pin(async move {
                        if event == quasar_container::RefreshEvent::Refreshing {
                            let payload = bincode::serialize(&vec![9u8]).unwrap();
                            let delivered =
                                old_bus.publish(Envelope::new("svc.rotate", payload));
                            stale_deliveries.fetch_add(delivered, Ordering::SeqCst);
                        }
                    })
                }),
            );
        }

        let old_conn = container.resolve::<BusConnection>("bus").unwrap();
        {
            let bus = Arc::clone(&new_bus);
            container
                .refresh_singleton("bus", move || Ok(BusConnection::connect(&bus)))
                .await;
        }
        old_conn.close();

        // Nothing was delivered on the old connection after RELOADING.
        assert_eq!(stale_deliveries.load(Ordering::SeqCst), 0);
        assert_eq!(old_bus.subscriber_count("svc.rotate"), 0);

        // The monitor restarts the service on the new connection.
        let resubscribed = {
            let new_bus = Arc::clone(&new_bus);
            wait_until(Duration::from_secs(2), move || {
                new_bus.subscriber_count("svc.rotate") == 1
            })
            .await
        };
        assert!(resubscribed);

        let reply = echo_request(&new_bus, "svc.rotate").await;
        assert_eq!(reply.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_services_rotate_independently() {
        let old_bus = InMemoryBus::new();
        let new_bus = InMemoryBus::new();

        let container = Arc::new(Container::new());
        {
            let bus = Arc::clone(&old_bus);
            container
                .register_singleton("bus", move || Ok(BusConnection::connect(&bus)))
                .unwrap();
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let mut bootstrapper = Bootstrapper::new();
        for subject in ["svc.one", "svc.two"] {
            bootstrapper.register(Arc::new(counting_service(&container, subject, &calls)));
        }
        bootstrapper.bootstrap().await.unwrap();

        {
            let bus = Arc::clone(&new_bus);
            container
                .refresh_singleton("bus", move || Ok(BusConnection::connect(&bus)))
                .await;
        }

        let both_moved = {
            let new_bus = Arc::clone(&new_bus);
            wait_until(Duration::from_secs(2), move || {
                new_bus.subscriber_count("svc.one") == 1
                    && new_bus.subscriber_count("svc.two") == 1
            })
            .await
        };
        assert!(both_moved);
        assert_eq!(old_bus.subscriber_count("svc.one"), 0);
        assert_eq!(old_bus.subscriber_count("svc.two"), 0);

        for subject in ["svc.one", "svc.two"] {
            let reply = echo_request(&new_bus, subject).await;
            assert_eq!(reply.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
        }
    }

    #[tokio::test]
    async fn test_repeated_rotation_survives() {
        let buses: Vec<Arc<InMemoryBus>> = (0..3).map(|_| InMemoryBus::new()).collect();

        let container = Arc::new(Container::new());
        {
            let bus = Arc::clone(&buses[0]);
            container
                .register_singleton("bus", move || Ok(BusConnection::connect(&bus)))
                .unwrap();
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let mut bootstrapper = Bootstrapper::new();
        bootstrapper.register(Arc::new(counting_service(&container, "svc.hops", &calls)));
        bootstrapper.bootstrap().await.unwrap();

        for bus in &buses[1..] {
            let target = Arc::clone(bus);
            container
                .refresh_singleton("bus", move || Ok(BusConnection::connect(&target)))
                .await;

            let moved = {
                let bus = Arc::clone(bus);
                wait_until(Duration::from_secs(2), move || {
                    bus.subscriber_count("svc.hops") == 1
                })
                .await
            };
            assert!(moved);

            let reply = echo_request(bus, "svc.hops").await;
            assert_eq!(reply.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
