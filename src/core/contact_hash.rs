//! Secondary contact lookup by salted short hash.
//!
//! Some contact updates reference the contact by a short code derived from
//! its identifier instead of the identifier itself. The index maps each code
//! back to the known contacts that produce it. Codes are three base64
//! characters, so collisions are possible and resolution is best-effort: on
//! a collision the first candidate in identifier order wins.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hashbrown::HashMap;
use md5::{Digest, Md5};
use tracing::debug;

use crate::types::{Jid, jid_user};

/// Salt appended to the identifier user part before hashing.
pub const CONTACT_HASH_SALT: &str = "WA_ADD_NOTIF";

const SHORT_HASH_LEN: usize = 3;

/// Short code for `jid`: the first three base64 characters of
/// `md5(user + salt)`. The user part is hashed as sent, case included.
pub fn short_hash(jid: &str) -> String {
    let digest = Md5::new()
        .chain_update(jid_user(jid).as_bytes())
        .chain_update(CONTACT_HASH_SALT.as_bytes())
        .finalize();
    let mut code = STANDARD.encode(digest);
    code.truncate(SHORT_HASH_LEN);
    code
}

/// Lazily built code-to-identifiers index.
#[derive(Debug, Default, Clone)]
pub struct ContactHashIndex {
    by_code: Option<HashMap<String, Vec<Jid>>>,
}

impl ContactHashIndex {
    /// Drops the index; the next resolution rebuilds it.
    pub fn invalidate(&mut self) {
        self.by_code = None;
    }

    /// Resolves `code` against `known` contact identifiers.
    pub fn resolve<'a, I>(&mut self, code: &str, known: I) -> Option<Jid>
    where
        I: IntoIterator<Item = &'a Jid>,
    {
        let index = self.by_code.get_or_insert_with(|| {
            let mut index: HashMap<String, Vec<Jid>> = HashMap::new();
            for jid in known {
                index.entry(short_hash(jid)).or_default().push(jid.clone());
            }
            for candidates in index.values_mut() {
                candidates.sort();
            }
            index
        });

        let candidates = index.get(code)?;
        if candidates.len() > 1 {
            debug!(code, candidates = candidates.len(), "short hash collision");
        }
        candidates.first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_upstream_codes() {
        assert_eq!(short_hash("4915@s.whatsapp.net"), "XDB");
        assert_eq!(short_hash("a@s.whatsapp.net"), "1L9");
        assert_eq!(short_hash("AbC@s.whatsapp.net"), "hCz");
    }

    #[test]
    fn device_suffix_does_not_change_code() {
        assert_eq!(
            short_hash("4915:12@s.whatsapp.net"),
            short_hash("4915@s.whatsapp.net")
        );
        assert_eq!(short_hash("4915@s.whatsapp.net").len(), 3);
    }

    #[test]
    fn resolves_code_and_rebuilds_after_invalidate() {
        let known = vec!["a@s.whatsapp.net".to_string()];
        let mut index = ContactHashIndex::default();
        let code = short_hash("a@s.whatsapp.net");
        assert_eq!(index.resolve(&code, &known), Some(known[0].clone()));

        let code_b = short_hash("b@s.whatsapp.net");
        let grown = vec![known[0].clone(), "b@s.whatsapp.net".to_string()];
        if code_b != code {
            assert_eq!(index.resolve(&code_b, &grown), None);
            index.invalidate();
            assert_eq!(index.resolve(&code_b, &grown), Some(grown[1].clone()));
        }
    }
}
