use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

use pkg_types::lease::now_millis;

use crate::handoff::HandoffChannel;

/// Identity of the running peer.
///
/// Resolved once: an unconsumed handoff message wins, otherwise a fresh id
/// is generated. Later calls return the same id.
pub struct PeerIdentity {
    handoff: HandoffChannel,
    id: OnceCell<String>,
}

impl PeerIdentity {
    pub fn new(handoff: HandoffChannel) -> Self {
        Self {
            handoff,
            id: OnceCell::new(),
        }
    }

    pub async fn resolve(&self) -> String {
        self.id
            .get_or_init(|| async {
                match self.handoff.consume_if_present().await {
                    Ok(Some(id)) => {
                        info!("Inherited peer id {} from handoff", id);
                        id
                    }
                    Ok(None) => generate_peer_id(),
                    Err(e) => {
                        warn!("Handoff slot unreadable ({}), generating a peer id", e);
                        generate_peer_id()
                    }
                }
            })
            .await
            .clone()
    }
}

/// Time-based prefix plus random suffix, e.g. `m2x1k9a0-3f9c2b1d7e6a`.
/// Unique in practice; not meant to be unguessable.
pub fn generate_peer_id() -> String {
    let millis = now_millis().max(0) as u64;
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", to_base36(millis), &suffix[..12])
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::SharedStore;
    use pkg_constants::state::HANDOFF_KEY;
    use pkg_types::validate::validate_peer_id;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn identity(shared: &SharedStore, origin: &str) -> PeerIdentity {
        PeerIdentity::new(HandoffChannel::new(Arc::new(shared.attach(origin))))
    }

    #[test]
    fn base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn generated_ids_are_distinct_and_valid() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_peer_id()).collect();
        assert_eq!(ids.len(), 1000);
        for id in &ids {
            assert!(validate_peer_id(id).is_ok(), "invalid id {}", id);
        }
    }

    #[tokio::test]
    async fn resolve_is_stable() {
        let shared = SharedStore::in_memory().await.unwrap();
        let ident = identity(&shared, "tab-a");
        let first = ident.resolve().await;
        assert_eq!(ident.resolve().await, first);
    }

    #[tokio::test]
    async fn handoff_takes_precedence_and_is_consumed() {
        let shared = SharedStore::in_memory().await.unwrap();
        HandoffChannel::new(Arc::new(shared.attach("tab-old")))
            .publish("peer-x")
            .await
            .unwrap();

        let ident = identity(&shared, "tab-new");
        assert_eq!(ident.resolve().await, "peer-x");
        assert!(shared.get(HANDOFF_KEY).await.unwrap().is_none());

        let other = identity(&shared, "tab-later");
        assert_ne!(other.resolve().await, "peer-x");
    }

    #[tokio::test]
    async fn concurrent_starts_adopt_handoff_once() {
        let shared = SharedStore::in_memory().await.unwrap();
        HandoffChannel::new(Arc::new(shared.attach("tab-old")))
            .publish("peer-x")
            .await
            .unwrap();

        let a = identity(&shared, "tab-a");
        let b = identity(&shared, "tab-b");
        let (id_a, id_b) = tokio::join!(a.resolve(), b.resolve());
        let adopted = [&id_a, &id_b]
            .into_iter()
            .filter(|id| id.as_str() == "peer-x")
            .count();
        assert_eq!(adopted, 1);
        assert_ne!(id_a, id_b);
    }
}
