//! Peer-wire protocol: handshake, message framing, and the per-connection
//! session that drives the swarm coordinator.
pub mod handshake;
pub mod message;
pub mod session;

/// Generates a 20-byte peer-id: an 8-byte client prefix followed by 12
/// decimal digits drawn from a uniform random source.
pub fn generate_peer_id() -> [u8; 20] {
    use rand::Rng;

    let mut peer_id = [0u8; 20];
    let prefix = b"-RT0010-";
    peer_id[..prefix.len()].copy_from_slice(prefix);

    let mut rng = rand::rng();
    for slot in &mut peer_id[prefix.len()..] {
        *slot = b'0' + rng.random_range(0..10);
    }
    peer_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_has_client_prefix_and_digit_suffix() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], b"-RT0010-");
        assert!(id[8..].iter().all(|b| b.is_ascii_digit()));
    }
}
