//! 端点地址的分解与创建期校验。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 地址语法本身由外部解析器负责，端点只消费分解结果：主机段、端口段与可选的本地网卡段；
//! - 所有可以在创建期发现的问题（端口缺失、主机名非法、网卡不存在）都在这里一次性检出，
//!   之后状态机重复解析同一地址时不会再失败。
//!
//! ## 契约（What）
//! - 绑定地址：`iface:port`，`iface` 为 `*` 或 IP 字面量；
//! - 连接地址：`[iface;]host:port`，`host` 为 IP 字面量（IPv6 可带方括号）或合法主机名；
//! - 端口取最后一个 `:` 之后的十进制数字，范围 `0..=65535`；连接端额外拒绝端口 0。
//!
//! ## 注意事项（Trade-offs）
//! - 不支持按网卡名（如 `eth0`）绑定，此类输入统一报告 [`ConfigError::NoSuchInterface`]。

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::ConfigError;

/// 主机名总长度上限（字节）。
const MAX_HOSTNAME_LEN: usize = 255;
/// 单个标签长度上限（字节）。
const MAX_LABEL_LEN: usize = 63;

/// 套接字地址族。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// 返回给定 IP 所属的地址族。
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// 该地址族的通配地址。
    pub fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// 本地网卡段的解析结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interface {
    /// `*`：通配地址。
    Any,
    /// 显式的 IP 字面量。
    Literal(IpAddr),
}

impl Interface {
    /// 解析网卡段。
    ///
    /// - `*` 解析为 [`Interface::Any`]；
    /// - IP 字面量（可带方括号）解析为 [`Interface::Literal`]，但 `ipv4_only` 时拒绝 IPv6；
    /// - 其余输入返回 [`ConfigError::NoSuchInterface`]。
    pub fn parse(segment: &str, ipv4_only: bool) -> Result<Self, ConfigError> {
        if segment == "*" {
            return Ok(Interface::Any);
        }
        match strip_brackets(segment).parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) if ipv4_only => Err(ConfigError::no_interface(segment)),
            Ok(ip) => Ok(Interface::Literal(ip)),
            Err(_) => Err(ConfigError::no_interface(segment)),
        }
    }

    /// 解析为监听使用的 IP：通配地址在 `ipv4_only` 下为 `0.0.0.0`，否则为 `::`（双栈）。
    pub fn resolve(&self, ipv4_only: bool) -> IpAddr {
        match self {
            Interface::Any if ipv4_only => AddressFamily::Ipv4.unspecified(),
            Interface::Any => AddressFamily::Ipv6.unspecified(),
            Interface::Literal(ip) => *ip,
        }
    }
}

/// 监听端点的绑定地址：`iface:port`。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindAddress {
    interface: Interface,
    port: u16,
}

impl BindAddress {
    /// 分解并校验绑定地址。
    pub fn parse(address: &str, ipv4_only: bool) -> Result<Self, ConfigError> {
        let (iface, port) = address
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::invalid(address, "missing port"))?;
        let port =
            parse_port(port).ok_or_else(|| ConfigError::invalid(address, "port is not valid"))?;
        let interface = Interface::parse(iface, ipv4_only)?;
        Ok(Self { interface, port })
    }

    pub fn interface(&self) -> Interface {
        self.interface
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 组合网卡与端口，得到实际绑定的套接字地址。
    pub fn socket_addr(&self, ipv4_only: bool) -> SocketAddr {
        SocketAddr::new(self.interface.resolve(ipv4_only), self.port)
    }
}

/// 连接端点的目标地址：`[iface;]host:port`。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectAddress {
    local: Option<Interface>,
    host: String,
    port: u16,
}

impl ConnectAddress {
    /// 分解并校验连接地址。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 第一个 `;` 之前为本地网卡段，不存在时使用通配地址；
    ///   - 其后最后一个 `:` 分隔主机与端口；端口为 0 视为非法；
    ///   - 主机段必须是 IP 字面量或通过主机名校验的名字；
    /// - **执行 (How)**：先拆本地段，再从剩余部分的右侧拆端口，这样本地段中的 IPv6 冒号
    ///   不会干扰端口定位。
    pub fn parse(address: &str, ipv4_only: bool) -> Result<Self, ConfigError> {
        let (local, rest) = match address.split_once(';') {
            Some((local, rest)) => (Some(local), rest),
            None => (None, address),
        };
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::invalid(address, "missing port"))?;
        let port =
            parse_port(port).ok_or_else(|| ConfigError::invalid(address, "port is not valid"))?;
        if port == 0 {
            return Err(ConfigError::invalid(address, "cannot connect to port 0"));
        }

        let host = strip_brackets(host);
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) if ipv4_only => {
                return Err(ConfigError::invalid(
                    address,
                    "IPv6 literal is not allowed with ipv4-only",
                ));
            }
            Ok(_) => {}
            Err(_) if is_valid_hostname(host) => {}
            Err(_) => {
                return Err(ConfigError::invalid(
                    address,
                    "host is neither a literal nor a valid hostname",
                ));
            }
        }

        let local = local
            .map(|segment| Interface::parse(segment, ipv4_only))
            .transpose()?;

        Ok(Self {
            local,
            host: host.to_owned(),
            port,
        })
    }

    /// 需要交给解析器的主机名（已去掉方括号）。
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> Option<Interface> {
        self.local
    }

    /// 远端套接字地址：解析结果 + 端口。
    pub fn remote_addr(&self, resolved: IpAddr) -> SocketAddr {
        SocketAddr::new(resolved, self.port)
    }

    /// 本地绑定地址，端口固定为 0。
    ///
    /// 未指定或指定为 `*` 时，通配地址跟随远端地址族，避免 IPv4 套接字绑定到 `::`。
    pub fn local_addr(&self, remote: &IpAddr) -> SocketAddr {
        let ip = match self.local {
            None | Some(Interface::Any) => AddressFamily::of(remote).unspecified(),
            Some(Interface::Literal(ip)) => ip,
        };
        SocketAddr::new(ip, 0)
    }
}

fn strip_brackets(segment: &str) -> &str {
    segment
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(segment)
}

fn parse_port(segment: &str) -> Option<u16> {
    if segment.is_empty() || segment.len() > 5 || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse::<u16>().ok()
}

/// DNS 主机名校验：总长 1..=255，标签 1..=63 字节，仅允许字母数字与 `-`，且标签不以 `-` 开头。
/// 允许末尾的单个 `.`。
pub fn is_valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    let mut label_len = 0usize;
    for byte in name.bytes() {
        match byte {
            b'.' => {
                if label_len == 0 {
                    return false;
                }
                label_len = 0;
            }
            b'-' if label_len == 0 => return false,
            b if b.is_ascii_alphanumeric() || b == b'-' => {
                label_len += 1;
                if label_len > MAX_LABEL_LEN {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}
