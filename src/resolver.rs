//! Best-effort discovery of the LAN-facing local address.

use std::net::IpAddr;

use tokio::net::TcpStream;

use crate::error::NetResult;

/// Probe target; only used to let the OS pick the outbound interface.
const PROBE_ADDR: &str = "google.com:80";

/// Returns the local address the OS routes outbound traffic through.
///
/// Opens a throwaway connection to a well-known public host, reads the
/// locally bound address off the socket and drops it. No data is exchanged
/// (an Internet connection is not required but helps). This is a heuristic:
/// hosts with several adapters (VPN, virtual machine bridges, VLANs) may get
/// an address the intended peer cannot actually reach. Treat the result as
/// advisory and let the operator override it when dialing out.
pub async fn local_address() -> NetResult<IpAddr> {
    let stream = TcpStream::connect(PROBE_ADDR).await?;
    Ok(stream.local_addr()?.ip())
}
