//! 基于 `tokio::net::lookup_host` 的名字解析器。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 系统解析器是阻塞调用，`lookup_host` 会把它放到 Tokio 的阻塞线程池中执行，
//!   驱动任务不会因慢速 DNS 停顿。
//!
//! ## 契约（What）
//! - IP 字面量不经过系统解析器，直接投递结果；
//! - `ipv4_only` 时只接受 IPv4 结果，否则取系统返回的第一个地址；
//! - 没有可用地址时以 `AddrNotAvailable` 报告失败；
//! - 投递 `Done` 后解析器保持非空闲，直到 `stop`。

use std::io;
use std::net::IpAddr;

use spark_endpoint::{NameResolver, ResolverEvent};
use tokio::task::JoinHandle;

use crate::error::{RESOLVE, annotate};
use crate::mailbox::Post;

pub struct TokioResolver {
    post: Post<ResolverEvent>,
    lookup: Option<JoinHandle<()>>,
    active: bool,
}

impl TokioResolver {
    pub(crate) fn new(post: Post<ResolverEvent>) -> Self {
        Self {
            post,
            lookup: None,
            active: false,
        }
    }
}

async fn lookup(host: String, ipv4_only: bool) -> io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut candidates = tokio::net::lookup_host((host.as_str(), 0)).await?;
    candidates
        .map(|addr| addr.ip())
        .find(|ip| !ipv4_only || ip.is_ipv4())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no usable address for {host}"),
            )
        })
}

impl NameResolver for TokioResolver {
    fn start(&mut self, host: &str, ipv4_only: bool) {
        if let Some(task) = self.lookup.take() {
            task.abort();
        }
        let post = self.post.clone();
        let host = host.to_owned();
        self.lookup = Some(tokio::spawn(async move {
            let result = lookup(host, ipv4_only)
                .await
                .map_err(|error| annotate(RESOLVE, error).kind());
            post(ResolverEvent::Done(result));
        }));
        self.active = true;
    }

    fn stop(&mut self) {
        if let Some(task) = self.lookup.take() {
            task.abort();
        }
        if self.active {
            self.active = false;
            (self.post)(ResolverEvent::Stopped);
        }
    }

    fn is_idle(&self) -> bool {
        !self.active
    }
}

impl Drop for TokioResolver {
    fn drop(&mut self) {
        if let Some(task) = self.lookup.take() {
            task.abort();
        }
    }
}
