//! Client configuration rendering
//!
//! Serializes a peer's tunnel configuration in the `wg-quick` style that
//! AmneziaWG clients import. Stanza names and field order are a
//! compatibility contract with those clients.

use std::fmt::Write;

use crate::interface::{ObfuscationParameters, ServerIdentity};
use crate::store::Peer;

/// Route everything through the tunnel
pub const CLIENT_ALLOWED_IPS: &str = "0.0.0.0/0, ::/0";

/// Keepalive interval in seconds
pub const PERSISTENT_KEEPALIVE: u32 = 25;

/// Render the client configuration for `peer`.
///
/// Output depends only on the inputs; nothing is defaulted, so an empty DNS
/// list renders as an empty field.
pub fn render_client_config(
    peer: &Peer,
    server: &ServerIdentity,
    obfuscation: &ObfuscationParameters,
) -> String {
    let mut out = String::with_capacity(512);

    // Writing into a String cannot fail
    let _ = writeln!(out, "[Interface]");
    let _ = writeln!(out, "PrivateKey = {}", peer.private_key);
    let _ = writeln!(out, "Address = {}", peer.allowed_ips());
    let _ = writeln!(out, "DNS = {}", server.dns.join(", "));
    let _ = writeln!(out);
    let _ = writeln!(out, "Jc = {}", obfuscation.jc);
    let _ = writeln!(out, "Jmin = {}", obfuscation.jmin);
    let _ = writeln!(out, "Jmax = {}", obfuscation.jmax);
    let _ = writeln!(out, "S1 = {}", obfuscation.s1);
    let _ = writeln!(out, "S2 = {}", obfuscation.s2);
    let _ = writeln!(out, "H1 = {}", obfuscation.h1);
    let _ = writeln!(out, "H2 = {}", obfuscation.h2);
    let _ = writeln!(out, "H3 = {}", obfuscation.h3);
    let _ = writeln!(out, "H4 = {}", obfuscation.h4);
    let _ = writeln!(out);
    let _ = writeln!(out, "[Peer]");
    let _ = writeln!(out, "PublicKey = {}", server.public_key);
    let _ = writeln!(out, "PresharedKey = {}", peer.preshared_key);
    let _ = writeln!(out, "Endpoint = {}:{}", server.endpoint, server.listen_port);
    let _ = writeln!(out, "AllowedIPs = {}", CLIENT_ALLOWED_IPS);
    let _ = writeln!(out, "PersistentKeepalive = {}", PERSISTENT_KEEPALIVE);

    out
}
