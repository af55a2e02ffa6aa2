//! `HttpLoadBalancer` against a served control plane.

use rollgrid_config::Backend;
use rollgrid_lb::{HealthChecks, HttpLoadBalancer, LbError, LoadBalancer, MemoryLoadBalancer, PoolStatus, PoolType};

async fn serve(lb: MemoryLoadBalancer) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, rollgrid_lbd::build_router(lb)).await.unwrap();
    });
    addr
}

fn backend(addr: &str) -> Backend {
    addr.parse().unwrap()
}

#[tokio::test]
async fn client_drives_served_pool() {
    let lb = MemoryLoadBalancer::new();
    let client = HttpLoadBalancer::new(&serve(lb.clone()).await);

    assert!(matches!(
        client.pool_health("/").await,
        Err(LbError::Status { status: 404, .. })
    ));

    client
        .add_pool("/", PoolType::P2c, &HealthChecks::healthz("/healthz"))
        .await
        .unwrap();
    assert_eq!(client.pool_health("/").await.unwrap().status, PoolStatus::Empty);
    assert_eq!(lb.pool_config("/").unwrap().0, PoolType::P2c);

    client.add_backend("/", backend("127.0.0.1:8082")).await.unwrap();
    client.add_backend("/", backend("127.0.0.1:8083")).await.unwrap();
    let health = client.pool_health("/").await.unwrap();
    assert_eq!(health.status, PoolStatus::Full);
    assert_eq!(
        health.backends,
        vec![backend("127.0.0.1:8082"), backend("127.0.0.1:8083")]
    );

    client.remove_backend("/", backend("127.0.0.1:8082")).await.unwrap();
    assert_eq!(lb.backends("/"), vec![backend("127.0.0.1:8083")]);
}

#[tokio::test]
async fn errors_keep_their_status() {
    let lb = MemoryLoadBalancer::new().with_pool("/", &[backend("127.0.0.1:8082")]);
    let client = HttpLoadBalancer::new(&serve(lb.clone()).await);

    let dup = client.add_backend("/", backend("127.0.0.1:8082")).await;
    assert!(matches!(dup, Err(LbError::Status { status: 409, .. })), "got {dup:?}");

    let missing = client.remove_backend("/", backend("127.0.0.1:9999")).await;
    assert!(matches!(missing, Err(LbError::Status { status: 404, .. })), "got {missing:?}");

    lb.mark_unhealthy("/", backend("127.0.0.1:8082"));
    assert_eq!(client.pool_health("/").await.unwrap().status, PoolStatus::Degraded);
}
