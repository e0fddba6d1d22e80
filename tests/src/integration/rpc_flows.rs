//! # RPC Flow Tests
//!
//! Full-stack request/response flows: container + bus + service +
//! bootstrapper wired together the way a real process wires them.

#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
use serde::{Deserialize, Serialize};

#[cfg(test)]
use quasar_bus::{BusConnection, Headers, InMemoryBus};
#[cfg(test)]
use quasar_codec::BincodeCodec;
#[cfg(test)]
use quasar_container::Container;
#[cfg(test)]
use quasar_runtime::Bootstrapper;
#[cfg(test)]
use quasar_service::{status, RpcService, Service};

#[cfg(test)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct EchoRequest {
    body: String,
}

#[cfg(test)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct EchoResponse {
    body: String,
}

/// Container with a "bus" connection singleton over a fresh bus.
#[cfg(test)]
fn wired_container(bus: &Arc<InMemoryBus>) -> Arc<Container> {
    let container = Arc::new(Container::new());
    let bus = Arc::clone(bus);
    container
        .register_singleton("bus", move || Ok(BusConnection::connect(&bus)))
        .unwrap();
    container
}

#[cfg(test)]
fn echo_service(
    container: &Arc<Container>,
    subject: &str,
    calls: &Arc<AtomicUsize>,
) -> RpcService<EchoRequest, EchoResponse, BincodeCodec> {
    let calls = Arc::clone(calls);
    RpcService::new(
        Arc::clone(container),
        "bus",
        subject,
        "workers",
        BincodeCodec,
        move |request: EchoRequest| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(EchoResponse {
                    body: request.body,
                })
            }
        },
    )
}

#[cfg(test)]
async fn send(
    bus: &Arc<InMemoryBus>,
    subject: &str,
    request: &EchoRequest,
) -> quasar_bus::Envelope {
    let client = BusConnection::connect(bus);
    let payload = bincode::serialize(request).unwrap();
    client
        .request(subject, Headers::new(), payload, Duration::from_secs(1))
        .await
        .expect("reply")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_round_trip_through_bootstrapper() {
        let bus = InMemoryBus::new();
        let container = wired_container(&bus);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut bootstrapper = Bootstrapper::new();
        bootstrapper.register(Arc::new(echo_service(&container, "svc.echo", &calls)));
        bootstrapper.bootstrap().await.unwrap();

        let reply = send(
            &bus,
            "svc.echo",
            &EchoRequest {
                body: String::from("ping"),
            },
        )
        .await;

        assert_eq!(reply.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
        let response: EchoResponse = bincode::deserialize(&reply.payload).unwrap();
        assert_eq!(response.body, "ping");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identical_requests_hit_the_cache() {
        let bus = InMemoryBus::new();
        let container = wired_container(&bus);
        let calls = Arc::new(AtomicUsize::new(0));

        let service = echo_service(&container, "svc.cached", &calls)
            .with_cache(Duration::from_secs(3600));
        service.configure(false).await.unwrap();
        service.start().await.unwrap();

        let request = EchoRequest {
            body: String::from("same bytes"),
        };
        let first = send(&bus, "svc.cached", &request).await;
        let second = send(&bus, "svc.cached", &request).await;

        assert_eq!(first.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
        assert_eq!(second.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
        assert_eq!(first.payload, second.payload);
        // Second reply came from the bucket, not the handler.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_requests_miss_the_cache() {
        let bus = InMemoryBus::new();
        let container = wired_container(&bus);
        let calls = Arc::new(AtomicUsize::new(0));

        let service = echo_service(&container, "svc.cached2", &calls)
            .with_cache(Duration::from_secs(3600));
        service.configure(false).await.unwrap();
        service.start().await.unwrap();

        send(&bus, "svc.cached2", &EchoRequest { body: String::from("a") }).await;
        send(&bus, "svc.cached2", &EchoRequest { body: String::from("b") }).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_fanout_mirrors_the_reply() {
        let bus = InMemoryBus::new();
        let container = wired_container(&bus);
        let calls = Arc::new(AtomicUsize::new(0));

        let service = echo_service(&container, "svc.orders", &calls)
            .with_success_fanout(["audit.orders", "metrics.orders"]);
        service.configure(false).await.unwrap();
        service.start().await.unwrap();

        let observer = BusConnection::connect(&bus);
        let mut audit = observer.subscribe("audit.orders").unwrap();
        let mut metrics = observer.subscribe("metrics.orders").unwrap();

        let reply = send(
            &bus,
            "svc.orders",
            &EchoRequest {
                body: String::from("order-1"),
            },
        )
        .await;

        for sub in [&mut audit, &mut metrics] {
            let copy = tokio::time::timeout(Duration::from_secs(1), sub.recv())
                .await
                .expect("timeout")
                .expect("fan-out envelope");
            assert_eq!(copy.payload, reply.payload);
            assert_eq!(copy.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
            assert!(copy.reply.is_none());
        }
    }

    #[tokio::test]
    async fn test_error_fanout_on_handler_failure() {
        let bus = InMemoryBus::new();
        let container = wired_container(&bus);

        let service: RpcService<EchoRequest, EchoResponse, BincodeCodec> = RpcService::new(
            Arc::clone(&container),
            "bus",
            "svc.flaky",
            "workers",
            BincodeCodec,
            |_request: EchoRequest| async move { anyhow::bail!("always fails") },
        )
        .with_success_fanout(["audit.ok"])
        .with_error_fanout(["audit.failed"]);
        service.configure(false).await.unwrap();
        service.start().await.unwrap();

        let observer = BusConnection::connect(&bus);
        let mut ok_sub = observer.subscribe("audit.ok").unwrap();
        let mut failed_sub = observer.subscribe("audit.failed").unwrap();

        let reply = send(
            &bus,
            "svc.flaky",
            &EchoRequest {
                body: String::from("x"),
            },
        )
        .await;
        assert_eq!(
            reply.headers.get(status::STATUS_HEADER),
            Some(status::FAIL_HANDLE)
        );

        let copy = tokio::time::timeout(Duration::from_secs(1), failed_sub.recv())
            .await
            .expect("timeout")
            .expect("error fan-out envelope");
        assert_eq!(
            copy.headers.get(status::STATUS_HEADER),
            Some(status::FAIL_HANDLE)
        );
        assert!(copy.reply.is_none());

        // The success subject saw nothing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tokio::time::timeout(Duration::from_millis(50), ok_sub.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_queue_group_handles_each_request_once() {
        let bus = InMemoryBus::new();
        let container = wired_container(&bus);
        let calls = Arc::new(AtomicUsize::new(0));

        // Two instances of the same service share the queue group.
        let first = echo_service(&container, "svc.pool", &calls);
        let second = echo_service(&container, "svc.pool", &calls);
        for service in [&first, &second] {
            service.configure(false).await.unwrap();
            service.start().await.unwrap();
        }

        for i in 0..6 {
            let reply = send(
                &bus,
                "svc.pool",
                &EchoRequest {
                    body: format!("req-{i}"),
                },
            )
            .await;
            assert_eq!(reply.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
        }

        // Exactly one member handled each request.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_services_share_one_connection_resolution() {
        let bus = InMemoryBus::new();
        let container = Arc::new(Container::new());
        let factory_runs = Arc::new(AtomicUsize::new(0));
        {
            let bus = Arc::clone(&bus);
            let factory_runs = Arc::clone(&factory_runs);
            container
                .register_singleton("bus", move || {
                    factory_runs.fetch_add(1, Ordering::SeqCst);
                    Ok(BusConnection::connect(&bus))
                })
                .unwrap();
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let mut bootstrapper = Bootstrapper::new();
        for subject in ["svc.a", "svc.b", "svc.c"] {
            bootstrapper.register(Arc::new(echo_service(&container, subject, &calls)));
        }
        bootstrapper.bootstrap().await.unwrap();

        assert_eq!(factory_runs.load(Ordering::SeqCst), 1);

        let reply = send(
            &bus,
            "svc.b",
            &EchoRequest {
                body: String::from("shared"),
            },
        )
        .await;
        assert_eq!(reply.headers.get(status::STATUS_HEADER), Some(status::SUCCESS));
    }
}
