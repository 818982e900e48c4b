use crate::data_structures::{Hashlock, Secret};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Fresh 32-byte secret from the operating system RNG.
pub fn generate_secret() -> Secret {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Secret::from_bytes(bytes)
}

pub fn generate_hashlock(data: &[u8]) -> Hashlock {
    let digest: [u8; 32] = Sha256::digest(data).into();
    Hashlock::from_bytes(digest)
}

/// Hashlock for a secret handed in as text. A 64 character hex string is
/// decoded and its raw bytes hashed, anything else is hashed as UTF-8.
pub fn hashlock_for_input(input: &str) -> Hashlock {
    match Secret::from_hex(input) {
        Ok(secret) => secret.hashlock(),
        Err(_) => generate_hashlock(input.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashlock_of_text_secret() {
        let hashlock = hashlock_for_input("s3cr3t");
        assert_eq!(
            hashlock.to_hex(),
            hex::encode(Sha256::digest(b"s3cr3t"))
        );
    }

    #[test]
    fn test_hashlock_of_generated_secret_hashes_raw_bytes() {
        let secret = generate_secret();
        let from_text = hashlock_for_input(&secret.to_hex());
        assert_eq!(from_text, generate_hashlock(secret.as_bytes()));
        assert!(secret.matches(&from_text));
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_ne!(a.hashlock(), b.hashlock());
        assert_eq!(a.hashlock(), a.hashlock());
    }
}
