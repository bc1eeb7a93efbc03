use std::collections::HashSet;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::error::Error;
use crate::netlink::LinkKind;

/// Kernel interface names are capped at `IFNAMSIZ` (16 bytes, 15 usable) on
/// Linux, so each prefix leaves enough room for the random suffix.
const RANDOM_SUFFIX_LEN: usize = 8;
const MAX_NAME_ATTEMPTS: usize = 32;

fn prefix_for(kind: LinkKind) -> &'static str {
    match kind {
        LinkKind::Bridge => "tcbr",
        LinkKind::Gretap => "tcgre",
        _ => "tcvn",
    }
}

fn random_suffix(n: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

/// Generates a kernel link name absent from `names_in_use`, inserting it on
/// success so the reservation is race-free for a caller holding the
/// topology lock. Bounded to `MAX_NAME_ATTEMPTS` tries, unlike the
/// unbounded retry the original design sketched — an implementer must not
/// reproduce that shape, since a stuck name generator should fail loudly
/// rather than spin.
pub(crate) fn gen_link_name(kind: LinkKind, names_in_use: &mut HashSet<String>) -> Result<String, Error> {
    let prefix = prefix_for(kind);
    for _ in 0..MAX_NAME_ATTEMPTS {
        let candidate = format!("{}{}", prefix, random_suffix(RANDOM_SUFFIX_LEN));
        if names_in_use.insert(candidate.clone()) {
            return Ok(candidate);
        }
    }
    Err(Error::NameExhausted {
        attempts: MAX_NAME_ATTEMPTS,
    })
}
