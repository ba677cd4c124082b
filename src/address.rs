use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Whether a client address refers to this machine or a private network.
///
/// Accepts bare IPs, `ip:port`, bracketed IPv6 and IPv4-mapped IPv6 addresses. Anything that
/// doesn't parse as an address is not local, except the literal `localhost`.
pub fn is_local_address(addr: &str) -> bool {
    if addr.eq_ignore_ascii_case("localhost") {
        return true;
    }

    match parse_ip(addr) {
        Some(IpAddr::V4(ip)) => is_local_v4(ip),
        Some(IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
            Some(mapped) => is_local_v4(mapped),
            None => is_local_v6(ip),
        },
        None => false,
    }
}

fn parse_ip(addr: &str) -> Option<IpAddr> {
    let addr = addr.trim();

    addr.parse::<IpAddr>()
        .ok()
        .or_else(|| addr.parse::<SocketAddr>().ok().map(|socket| socket.ip()))
        .or_else(|| {
            addr.strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .and_then(|inner| inner.parse::<IpAddr>().ok())
        })
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];

    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;

    ip.is_loopback() || ip.is_unspecified() || unique_local || link_local
}
