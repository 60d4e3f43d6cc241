use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{AttestationClient, AttestationError, AttestationMode};
use crate::domain::attestation::{AttestationEvent, AttestationEventType, TransactionId};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedEntry {
    pub sequence: u64,
    pub event_type: AttestationEventType,
    pub subject: String,
    pub payload_hash: String,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

impl SimulatedEntry {
    pub fn transaction_id(&self) -> TransactionId {
        TransactionId(format!("0x{}", self.entry_hash))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Stand-in for the external log when no gateway is configured.
///
/// Entries form an HMAC-signed hash chain so the local record stays
/// tamper-evident, and each transaction id is the `0x`-prefixed entry hash.
#[derive(Clone)]
pub struct SimulatedAttestationClient {
    signing_key: Vec<u8>,
    entries: Arc<Mutex<Vec<SimulatedEntry>>>,
}

impl SimulatedAttestationClient {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec(), entries: Arc::default() }
    }

    pub fn entries(&self) -> Vec<SimulatedEntry> {
        self.lock().clone()
    }

    pub fn verify_chain(&self) -> ChainVerification {
        let entries = self.lock();
        let mut previous_hash: Option<String> = None;

        for (index, entry) in entries.iter().enumerate() {
            let failure = |reason: String| ChainVerification {
                valid: false,
                verified_entries: index,
                latest_hash: previous_hash.clone(),
                failure_reason: Some(reason),
            };

            let expected_sequence = u64::try_from(index).unwrap_or(u64::MAX).saturating_add(1);
            if entry.sequence != expected_sequence {
                return failure(format!(
                    "sequence mismatch: expected {expected_sequence}, found {}",
                    entry.sequence
                ));
            }
            if entry.prev_hash != previous_hash {
                return failure(format!("previous hash mismatch at entry {}", entry.sequence));
            }

            let computed = hash_entry_material(
                entry.sequence,
                entry.event_type,
                &entry.subject,
                &entry.payload_hash,
                entry.prev_hash.as_deref(),
                entry.timestamp,
            );
            if computed != entry.entry_hash {
                return failure(format!("entry hash mismatch at entry {}", entry.sequence));
            }
            if hmac_hex(&self.signing_key, entry.entry_hash.as_bytes()) != entry.signature {
                return failure(format!("signature mismatch at entry {}", entry.sequence));
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        ChainVerification {
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SimulatedEntry>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn append(&self, event: &AttestationEvent) -> SimulatedEntry {
        let mut entries = self.lock();
        let sequence = u64::try_from(entries.len()).unwrap_or(u64::MAX).saturating_add(1);
        let prev_hash = entries.last().map(|entry| entry.entry_hash.clone());
        let timestamp = Utc::now();
        let subject = event.subject_key();
        let payload_hash = payload_hash(event);
        let entry_hash = hash_entry_material(
            sequence,
            event.event_type(),
            &subject,
            &payload_hash,
            prev_hash.as_deref(),
            timestamp,
        );
        let signature = hmac_hex(&self.signing_key, entry_hash.as_bytes());

        let entry = SimulatedEntry {
            sequence,
            event_type: event.event_type(),
            subject,
            payload_hash,
            prev_hash,
            entry_hash,
            signature,
            timestamp,
        };
        entries.push(entry.clone());
        entry
    }
}

#[async_trait]
impl AttestationClient for SimulatedAttestationClient {
    fn mode(&self) -> AttestationMode {
        AttestationMode::Simulation
    }

    async fn submit(&self, event: &AttestationEvent) -> Result<TransactionId, AttestationError> {
        Ok(self.append(event).transaction_id())
    }
}

fn payload_hash(event: &AttestationEvent) -> String {
    let canonical = match serde_json::to_vec(event) {
        Ok(payload) => payload,
        Err(_) => event.subject_key().into_bytes(),
    };
    sha256_hex(&canonical)
}

fn hash_entry_material(
    sequence: u64,
    event_type: AttestationEventType,
    subject: &str,
    payload_hash: &str,
    prev_hash: Option<&str>,
    timestamp: DateTime<Utc>,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}",
        sequence,
        event_type.as_str(),
        subject,
        payload_hash,
        prev_hash.unwrap_or(""),
        timestamp.to_rfc3339(),
    );
    sha256_hex(material.as_bytes())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    encode_hex(Sha256::digest(payload).as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
