// Segment decryption: key fetching with an in-memory key cache, and AES-128-CBC.

use std::collections::HashMap;
use std::sync::Arc;

use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::manifest::{EncryptionMethod, KeyInfo};
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Payloads above this size are decrypted on the blocking thread pool.
const OFFLOAD_THRESHOLD: usize = 256 * 1024;

/// Offloads CPU-heavy decryption to tokio's blocking pool.
pub struct DecryptionOffloader {
    threshold: usize,
}

impl Default for DecryptionOffloader {
    fn default() -> Self {
        Self {
            threshold: OFFLOAD_THRESHOLD,
        }
    }
}

impl DecryptionOffloader {
    pub async fn decrypt(
        &self,
        data: Bytes,
        key: &[u8; 16],
        iv: &[u8; 16],
    ) -> Result<Bytes, DownloadError> {
        if data.len() <= self.threshold {
            return decrypt_aes128_cbc(&data, key, iv);
        }
        let key = *key;
        let iv = *iv;
        tokio::task::spawn_blocking(move || decrypt_aes128_cbc(&data, &key, &iv))
            .await
            .map_err(|e| DownloadError::decryption(format!("decryption task failed: {e}")))?
    }
}

/// Decrypts a whole AES-128-CBC payload and strips PKCS#7 padding.
pub fn decrypt_aes128_cbc(
    data: &[u8],
    key: &[u8; 16],
    iv: &[u8; 16],
) -> Result<Bytes, DownloadError> {
    let mut buffer = data.to_vec();
    let cipher = Aes128CbcDec::new_from_slices(key, iv).map_err(|e| {
        DownloadError::decryption(format!("failed to initialize AES decryptor: {e}"))
    })?;
    let decrypted_len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| DownloadError::decryption(format!("decryption failed: {e}")))?
        .len();
    buffer.truncate(decrypted_len);
    Ok(Bytes::from(buffer))
}

/// Resolves keys through the job's HTTP client and decrypts segment payloads.
///
/// Each key URI is fetched at most once per job.
pub struct DecryptionService {
    http: Arc<HttpClient>,
    retry: RetryPolicy,
    keys: Mutex<HashMap<Url, [u8; 16]>>,
    offloader: DecryptionOffloader,
}

impl DecryptionService {
    pub fn new(http: Arc<HttpClient>, retry: RetryPolicy) -> Self {
        Self {
            http,
            retry,
            keys: Mutex::new(HashMap::new()),
            offloader: DecryptionOffloader::default(),
        }
    }

    async fn key_for(&self, uri: &Url) -> Result<[u8; 16], DownloadError> {
        // Held across the fetch so concurrent segments share one key request.
        let mut keys = self.keys.lock().await;
        if let Some(key) = keys.get(uri) {
            return Ok(*key);
        }

        let http = &self.http;
        let fetched = retry_with_backoff(&self.retry, http.token(), |_| async move {
            RetryAction::classify(http.get_bytes(uri, None, "key").await)
        })
        .await?;

        let key: [u8; 16] = fetched.as_ref().try_into().map_err(|_| {
            DownloadError::decryption(format!(
                "key from {uri} has incorrect length: {} bytes (expected 16)",
                fetched.len()
            ))
        })?;
        debug!(uri = %uri, "Fetched decryption key");
        keys.insert(uri.clone(), key);
        Ok(key)
    }

    /// Decrypts one segment payload.
    pub async fn decrypt(
        &self,
        data: Bytes,
        key_info: &KeyInfo,
        media_sequence: u64,
    ) -> Result<Bytes, DownloadError> {
        match key_info.method {
            EncryptionMethod::Aes128 => {
                let key = self.key_for(&key_info.uri).await?;
                let iv = key_info.iv_for(media_sequence);
                self.offloader.decrypt(data, &key, &iv).await
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cipher::BlockEncryptMut;

    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    pub(crate) fn encrypt_data(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let cipher = Aes128CbcEnc::new_from_slices(key, iv).unwrap();
        let padded_len = ((plaintext.len() / 16) + 1) * 16;
        let mut buffer = vec![0u8; padded_len];
        buffer[..plaintext.len()].copy_from_slice(plaintext);
        cipher
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_round_trip_small_payload() {
        let key = [0x42; 16];
        let iv = [0x24; 16];
        let encrypted = encrypt_data(b"transport stream bytes", &key, &iv);
        let decrypted = decrypt_aes128_cbc(&encrypted, &key, &iv).unwrap();
        assert_eq!(&decrypted[..], b"transport stream bytes");
    }

    #[test]
    fn test_wrong_key_fails_padding_check() {
        let encrypted = encrypt_data(&[7u8; 100], &[1; 16], &[2; 16]);
        // A wrong key almost always yields invalid padding.
        let result = decrypt_aes128_cbc(&encrypted, &[9; 16], &[2; 16]);
        if let Ok(bytes) = result {
            assert_ne!(&bytes[..], &[7u8; 100][..]);
        }
    }

    #[tokio::test]
    async fn test_offloaded_decryption_matches_inline() {
        let key = [3u8; 16];
        let iv = [4u8; 16];
        let plaintext: Vec<u8> = (0..OFFLOAD_THRESHOLD * 2).map(|i| (i % 251) as u8).collect();
        let encrypted = Bytes::from(encrypt_data(&plaintext, &key, &iv));
        let decrypted = DecryptionOffloader::default()
            .decrypt(encrypted, &key, &iv)
            .await
            .unwrap();
        assert_eq!(decrypted.len(), plaintext.len());
        assert_eq!(&decrypted[..], &plaintext[..]);
    }
}
