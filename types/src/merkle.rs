use crate::{hashing::sha256d, primitives::Hash256};

/// The merkle root of a list of transaction identifiers.
///
/// A lone identifier is its own root. At every level an odd tail is paired
/// with itself, per the consensus tree construction.
#[must_use]
pub fn merkle_root(mut hashes: Vec<Hash256>) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::zero();
    }

    while hashes.len() > 1 {
        if hashes.len() % 2 != 0 {
            let last = *hashes.last().expect("the list is non-empty");
            hashes.push(last);
        }

        hashes = hashes
            .chunks_exact(2)
            .map(|pair| {
                let mut preimage = [0; 64];
                preimage[..32].copy_from_slice(pair[0].as_bytes());
                preimage[32..].copy_from_slice(pair[1].as_bytes());
                sha256d(preimage)
            })
            .collect();
    }

    hashes[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_of_single_hash_is_the_hash() {
        let hash = Hash256::repeat_byte(7);
        assert_eq!(merkle_root(vec![hash]), hash);
    }

    #[test]
    fn odd_levels_pair_the_tail_with_itself() {
        let a = Hash256::repeat_byte(1);
        let b = Hash256::repeat_byte(2);
        let c = Hash256::repeat_byte(3);

        let ab = merkle_root(vec![a, b]);
        let cc = merkle_root(vec![c, c]);

        assert_eq!(merkle_root(vec![a, b, c]), merkle_root(vec![ab, cc]));
    }

    #[test]
    fn root_depends_on_order() {
        let a = Hash256::repeat_byte(1);
        let b = Hash256::repeat_byte(2);
        assert_ne!(merkle_root(vec![a, b]), merkle_root(vec![b, a]));
    }
}
