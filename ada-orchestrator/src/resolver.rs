use async_trait::async_trait;

/// Reverse DNS for freshly provisioned machines.
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    /// Hostname for `ip`, or an empty string when there is none.
    async fn hostname(&self, ip: &str) -> String;
}

/// Resolves through the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostnameResolver for SystemResolver {
    async fn hostname(&self, ip: &str) -> String {
        ada_core::dns::reverse_lookup_async(ip.to_string()).await
    }
}

/// Never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

#[async_trait]
impl HostnameResolver for NoopResolver {
    async fn hostname(&self, _ip: &str) -> String {
        String::new()
    }
}
