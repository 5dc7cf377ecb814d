use super::{
    AuthSecret, EncryptionKey, EngineEncryptionKey, MasterSeed, MnemonicEntropy, OwnerKeyBytes,
};
use crate::errors::{Result, VeilError};
use hkdf::Hkdf;
use hmac::Hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

/// PBKDF2-HMAC-SHA256 work factor. Changing it changes every wallet derived from a password.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

const SALT_PREFIX: &[u8] = b"veil-wallet-v1";
const SALT_SECRET_BYTES: usize = 8;

/// HKDF domain separation for one sub-key.
struct Label {
    salt: &'static [u8],
    info: &'static [u8],
}

const ENCRYPTION_KEY: Label = Label {
    salt: b"veil-encryption-key",
    info: b"aes-256-gcm",
};

const OWNER_KEY: Label = Label {
    salt: b"veil-owner-key",
    info: b"secp256k1",
};

const MNEMONIC_ENTROPY: Label = Label {
    salt: b"veil-railgun-mnemonic",
    info: b"bip39-entropy",
};

const ENGINE_DB_KEY: Label = Label {
    salt: b"veil-railgun-encryption",
    info: b"railgun-db-encryption-key",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations < PBKDF2_ITERATIONS {
            return Err(VeilError::Configuration(format!(
                "pbkdf2 iterations must be at least {PBKDF2_ITERATIONS}"
            )));
        }
        Ok(Self { iterations })
    }

    /// Cheap parameters so test suites don't spend seconds per derivation.
    #[cfg(any(test, feature = "test-helpers"))]
    pub const fn insecure_for_tests(iterations: u32) -> Self {
        Self { iterations }
    }

    pub const fn iterations(self) -> u32 {
        self.iterations
    }
}

/// Protocol prefix followed by the first (up to) 8 bytes of the secret.
///
/// The full secret still goes through PBKDF2; the prefix only diversifies the salt so that no
/// salt has to be stored.
fn deterministic_salt(secret: &[u8]) -> Zeroizing<Vec<u8>> {
    let take = secret.len().min(SALT_SECRET_BYTES);
    let mut salt = Zeroizing::new(Vec::with_capacity(SALT_PREFIX.len() + take));
    salt.extend_from_slice(SALT_PREFIX);
    salt.extend(secret.iter().take(take));
    salt
}

fn pbkdf2_seed(secret: &[u8], salt: &[u8], iterations: u32) -> Result<MasterSeed> {
    let mut seed = MasterSeed([0_u8; 32]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(secret, salt, iterations, &mut seed.0)
        .map_err(|e| VeilError::Derivation(format!("pbkdf2: {e}")))?;
    Ok(seed)
}

/// Derive the master seed. Runs on the blocking pool; the caller's task only awaits.
pub async fn derive_master_seed(
    auth: &AuthSecret,
    salt: Option<&[u8]>,
    params: KdfParams,
) -> Result<MasterSeed> {
    let secret = Zeroizing::new(auth.expose().to_vec());
    let salt = match salt {
        Some(s) => Zeroizing::new(s.to_vec()),
        None => deterministic_salt(&secret),
    };

    tokio::task::spawn_blocking(move || pbkdf2_seed(&secret, &salt, params.iterations))
        .await
        .map_err(|e| VeilError::Derivation(format!("kdf task: {e}")))?
}

fn expand_into(seed: &MasterSeed, label: &Label, out: &mut [u8]) -> Result<()> {
    let hk = Hkdf::<Sha256>::new(Some(label.salt), &seed.0);
    hk.expand(label.info, out)
        .map_err(|e| VeilError::Derivation(format!("hkdf expand: {e}")))
}

pub fn derive_encryption_key(seed: &MasterSeed) -> Result<EncryptionKey> {
    let mut key = EncryptionKey([0_u8; 32]);
    expand_into(seed, &ENCRYPTION_KEY, &mut key.0)?;
    Ok(key)
}

pub fn derive_engine_encryption_key(seed: &MasterSeed) -> Result<EngineEncryptionKey> {
    let mut raw = Zeroizing::new([0_u8; 32]);
    expand_into(seed, &ENGINE_DB_KEY, raw.as_mut_slice())?;
    Ok(EngineEncryptionKey::from_hex(hex::encode(raw.as_slice())))
}

pub fn derive_owner_key_bytes(seed: &MasterSeed) -> Result<OwnerKeyBytes> {
    let mut key = OwnerKeyBytes([0_u8; 32]);
    expand_into(seed, &OWNER_KEY, &mut key.0)?;
    Ok(key)
}

pub fn derive_mnemonic_entropy(seed: &MasterSeed) -> Result<MnemonicEntropy> {
    let mut entropy = MnemonicEntropy([0_u8; 16]);
    expand_into(seed, &MNEMONIC_ENTROPY, &mut entropy.0)?;
    Ok(entropy)
}
