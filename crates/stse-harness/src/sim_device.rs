//! Simulated STSAFE secure element.
//!
//! Implements [`Bus`] the way a real device behaves on the wire: it
//! collects a command across `send_*` calls, checks its CRC, verifies the
//! C-MAC against its own MAC counter, decrypts protected payloads, executes
//! a small command set (echo, random, query) and prepares a response that
//! the host reads back with `recv_*` calls. Every read cycle starts from the
//! beginning of the response, like a device that re-sends its buffer on each
//! read.
//!
//! # Fault Injection
//!
//! A [`FaultPlan`] scripts bus errors, busy polling, corrupted responses and
//! bad R-MACs. Chaos mode draws acknowledge failures from a seeded
//! `ChaCha20Rng`, so every run with the same seed fails the same way.

use std::collections::VecDeque;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use stse_core::{
    AccessCondition, AuthorizationRecord, Bus, BusError, CounterWidth, DeviceType, HostKeyQuery,
    MAC_SIZE, PersoInfo,
    encryption::{COMMAND_IV_SUBJECT, RESPONSE_IV_SUBJECT, pad, unpad},
    mac::{CMAC_SUBJECT, RMAC_SUBJECT, counter_block},
    query::{TAG_COMMAND_AUTHORIZATION, TAG_HOST_KEY_SLOT, TAG_HOST_KEY_SLOT_V2},
};
use stse_crypto::{AesKey, CmacContext, CryptoPlatform, KeyType, SoftwareCrypto};
use stse_proto::{CRC_SIZE, CommandCode, CommandHeader, Crc16, DeviceStatus, HeaderFlags, X25};

const RMAC_PRESENT: u8 = 0x80;
const CMAC_FRAME_TYPE: u8 = 0x00;
const RMAC_FRAME_TYPE: u8 = 0x80;

/// Scripted and random faults.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Errors returned by the next `send_start` calls
    pub send_start_errors: VecDeque<BusError>,
    /// Errors returned by the next `recv_start` calls
    pub recv_start_errors: VecDeque<BusError>,
    /// `recv_start` NACKs this many times after every command
    pub busy_polls: u32,
    /// Flip one bit of the next response at this wire offset
    pub corrupt_response_at: Option<usize>,
    /// Send a wrong R-MAC in the next protected response
    pub corrupt_next_rmac: bool,
    /// Probability of an acknowledge failure on every `*_start`
    pub chaos_ack_rate: f64,
}

/// Counters describing what the device saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Commands received with a valid length
    pub commands: u32,
    /// `send_start` calls, failed ones included
    pub send_starts: u32,
    /// `recv_start` calls, failed ones included
    pub recv_starts: u32,
    /// Acknowledge failures injected
    pub injected_faults: u32,
}

struct HostKeys {
    mac: AesKey,
    cipher: AesKey,
}

/// Simulated device.
pub struct SimDevice {
    device_type: DeviceType,
    host_keys: Option<HostKeys>,
    counter: u32,
    authorization: Vec<AuthorizationRecord>,
    perso: PersoInfo,
    faults: FaultPlan,
    rng: ChaCha20Rng,
    stats: SimStats,
    incoming: Vec<u8>,
    expected_len: usize,
    last_command: Vec<u8>,
    response: Vec<u8>,
    cursor: usize,
    busy: u32,
}

impl SimDevice {
    /// Device without host keys, every command free.
    pub fn new(device_type: DeviceType) -> Self {
        Self::with_seed(device_type, 0)
    }

    /// Device whose random output and chaos faults derive from `seed`.
    pub fn with_seed(device_type: DeviceType, seed: u64) -> Self {
        Self {
            device_type,
            host_keys: None,
            counter: 0,
            authorization: Vec::new(),
            perso: PersoInfo::default(),
            faults: FaultPlan::default(),
            rng: ChaCha20Rng::seed_from_u64(seed),
            stats: SimStats::default(),
            incoming: Vec::new(),
            expected_len: 0,
            last_command: Vec::new(),
            response: Vec::new(),
            cursor: 0,
            busy: 0,
        }
    }

    /// Provision the host key slot.
    #[must_use]
    pub fn with_host_keys(mut self, mac: AesKey, cipher: AesKey, counter: u32) -> Self {
        self.host_keys = Some(HostKeys { mac, cipher });
        self.counter = counter;
        self
    }

    /// Install a command authorization table.
    #[must_use]
    pub fn with_authorization(mut self, records: Vec<AuthorizationRecord>) -> Self {
        self.perso = PersoInfo::from_records(&records);
        self.authorization = records;
        self
    }

    /// Install a fault plan.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Mutable fault plan, for faults scheduled mid-test
    pub fn faults_mut(&mut self) -> &mut FaultPlan {
        &mut self.faults
    }

    /// Device MAC counter
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Activity counters
    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Last complete command frame, CRC included
    pub fn last_command(&self) -> &[u8] {
        &self.last_command
    }

    fn counter_width(&self) -> CounterWidth {
        self.device_type.counter_width().unwrap_or(CounterWidth::Bytes3)
    }

    fn inject_ack(&mut self) -> bool {
        let rate = self.faults.chaos_ack_rate;
        if rate > 0.0 && self.rng.gen_bool(rate.min(1.0)) {
            self.stats.injected_faults += 1;
            return true;
        }
        false
    }

    fn read_chunk(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = self.response.get(self.cursor).copied().unwrap_or(0);
            self.cursor += 1;
        }
    }

    fn complete_command(&mut self) {
        self.last_command = std::mem::take(&mut self.incoming);
        self.busy = self.faults.busy_polls;

        let (status, payload, rmac) = if self.last_command.len() == self.expected_len {
            self.stats.commands += 1;
            self.process(&self.last_command.clone())
        } else {
            (DeviceStatus::CommunicationError, Vec::new(), None)
        };
        self.response = self.encode_response(status, payload, rmac);
    }

    /// Execute one command frame: returns status, response payload and the
    /// R-MAC to append.
    fn process(&mut self, frame: &[u8]) -> (DeviceStatus, Vec<u8>, Option<Vec<u8>>) {
        let Some(split) = frame.len().checked_sub(CRC_SIZE) else {
            return (DeviceStatus::CommunicationError, Vec::new(), None);
        };
        let (body, crc) = frame.split_at(split);
        if X25.crc16_calculate(body) != u16::from_be_bytes([crc[0], crc[1]]) {
            tracing::debug!("sim device: command CRC mismatch");
            return (DeviceStatus::CommunicationError, Vec::new(), None);
        }
        let Some(header) = CommandHeader::parse(body) else {
            return (DeviceStatus::CommunicationError, Vec::new(), None);
        };
        let header_bytes = &body[..header.len()];
        let mut payload = body[header.len()..].to_vec();

        let access = self.perso.access_condition(header.code);
        let encryption = self.perso.encryption_flags(header.code);
        let authenticated = header.flags.contains(HeaderFlags::CMAC);

        if access == AccessCondition::Never || (access.requires_session() && !authenticated) {
            return (DeviceStatus::AccessConditionNotSatisfied, Vec::new(), None);
        }

        if authenticated {
            let Some(keys) = &self.host_keys else {
                return (DeviceStatus::WrongSession, Vec::new(), None);
            };
            if payload.len() < MAC_SIZE {
                return (DeviceStatus::InconsistentCommandData, Vec::new(), None);
            }
            let tag = payload.split_off(payload.len() - MAC_SIZE);

            let mut content = vec![CMAC_FRAME_TYPE];
            content.extend_from_slice(header_bytes);
            content.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            content.extend_from_slice(&payload);
            if !cmac(&keys.mac, &counter_block(self.counter_width(), self.counter, CMAC_SUBJECT), &content)
                .starts_with(&tag)
            {
                tracing::debug!(counter = self.counter, "sim device: C-MAC mismatch");
                return (DeviceStatus::InvalidCmac, Vec::new(), None);
            }
        }
        let wire_payload = payload.clone();

        if encryption.command && authenticated {
            match self.decrypt(&payload) {
                Some(plain) => payload = plain,
                None => return (DeviceStatus::InconsistentCommandData, Vec::new(), None),
            }
        }

        let (status, mut response) = self.execute(header.code, &payload);
        if !status.is_ok() || !authenticated {
            return (status, response, None);
        }

        self.counter = self.counter.wrapping_add(1);

        if encryption.response {
            response = self.encrypt(response);
        }

        if !header.flags.contains(HeaderFlags::RMAC) {
            return (status, response, None);
        }
        let Some(keys) = &self.host_keys else {
            return (status, response, None);
        };
        let mut content = vec![RMAC_FRAME_TYPE];
        content.extend_from_slice(header_bytes);
        content.extend_from_slice(&(wire_payload.len() as u16).to_be_bytes());
        content.extend_from_slice(&wire_payload);
        content.push(status.code() | RMAC_PRESENT);
        content.extend_from_slice(&(response.len() as u16).to_be_bytes());
        content.extend_from_slice(&response);
        let mut rmac = cmac(&keys.mac, &counter_block(self.counter_width(), self.counter, RMAC_SUBJECT), &content);
        rmac.truncate(MAC_SIZE);

        if std::mem::take(&mut self.faults.corrupt_next_rmac) {
            rmac[0] ^= 0xFF;
        }
        (status, response, Some(rmac))
    }

    fn execute(&mut self, code: CommandCode, payload: &[u8]) -> (DeviceStatus, Vec<u8>) {
        match code {
            CommandCode::ECHO => (DeviceStatus::Ok, payload.to_vec()),
            CommandCode::GENERATE_RANDOM => {
                let count = payload.first().copied().unwrap_or(0);
                let mut random = vec![0u8; usize::from(count)];
                self.rng.fill_bytes(&mut random);
                (DeviceStatus::Ok, random)
            },
            CommandCode::QUERY => self.query(payload.first().copied()),
            _ => (DeviceStatus::UnsupportedCommand, Vec::new()),
        }
    }

    fn query(&self, tag: Option<u8>) -> (DeviceStatus, Vec<u8>) {
        let host_key_query = self.device_type.host_key_query();
        let provisioned = u8::from(self.host_keys.is_some());

        match (tag, host_key_query) {
            (Some(TAG_HOST_KEY_SLOT), Some(HostKeyQuery::V1)) => {
                let mut record = vec![provisioned];
                record.extend_from_slice(&CounterWidth::Bytes3.encode(self.counter));
                (DeviceStatus::Ok, record)
            },
            (Some(TAG_HOST_KEY_SLOT_V2), Some(HostKeyQuery::V2)) => {
                let key_type = match self.host_keys.as_ref().map(|k| k.mac.key_type()) {
                    Some(KeyType::Aes256) => 1,
                    _ => 0,
                };
                let mut record = vec![provisioned, key_type];
                record.extend_from_slice(&CounterWidth::Bytes4.encode(self.counter));
                (DeviceStatus::Ok, record)
            },
            (Some(TAG_COMMAND_AUTHORIZATION), _) if !self.authorization.is_empty() => {
                let mut table = vec![0x00, self.authorization.len() as u8];
                for record in &self.authorization {
                    let (header, extended) = match record.code {
                        CommandCode::Standard(code) => (code, 0x00),
                        CommandCode::Extended(sub) => (stse_proto::EXTENDED_PREFIX, sub),
                    };
                    let encryption =
                        (u8::from(record.encryption.command) << 1) | u8::from(record.encryption.response);
                    table.extend_from_slice(&[header, extended, record.access as u8, encryption]);
                }
                (DeviceStatus::Ok, table)
            },
            _ => (DeviceStatus::UnsupportedCommand, Vec::new()),
        }
    }

    fn encrypt(&self, mut data: Vec<u8>) -> Vec<u8> {
        let Some(keys) = &self.host_keys else {
            return data;
        };
        pad(&mut data);
        let mut iv = counter_block(self.counter_width(), self.counter, RESPONSE_IV_SUBJECT);
        if SoftwareCrypto.aes_ecb_encrypt(&keys.cipher, &mut iv).is_err()
            || SoftwareCrypto.aes_cbc_encrypt(&keys.cipher, &iv, &mut data).is_err()
        {
            data.clear();
        }
        data
    }

    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        let keys = self.host_keys.as_ref()?;
        let mut iv = counter_block(self.counter_width(), self.counter.wrapping_add(1), COMMAND_IV_SUBJECT);
        SoftwareCrypto.aes_ecb_encrypt(&keys.cipher, &mut iv).ok()?;
        let mut plain = data.to_vec();
        SoftwareCrypto.aes_cbc_decrypt(&keys.cipher, &iv, &mut plain).ok()?;
        unpad(&plain).map(<[u8]>::to_vec)
    }

    fn encode_response(&mut self, status: DeviceStatus, mut payload: Vec<u8>, rmac: Option<Vec<u8>>) -> Vec<u8> {
        let mut header = status.code();
        if let Some(rmac) = rmac {
            header |= RMAC_PRESENT;
            payload.extend_from_slice(&rmac);
        }

        let mut covered = vec![header];
        covered.extend_from_slice(&payload);
        let crc = X25.crc16_calculate(&covered);

        let mut wire = vec![header];
        wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        wire.extend_from_slice(&payload);
        wire.extend_from_slice(&crc.to_be_bytes());

        if let Some(offset) = self.faults.corrupt_response_at.take()
            && let Some(byte) = wire.get_mut(offset)
        {
            *byte ^= 0x01;
        }
        wire
    }
}

fn cmac(key: &AesKey, block: &[u8], content: &[u8]) -> Vec<u8> {
    let mut tag = vec![0u8; 16];
    let Ok(mut mac) = SoftwareCrypto.aes_cmac_init(key) else {
        return tag;
    };
    mac.append(block);
    mac.append(content);
    if mac.compute_finish(&mut tag).is_err() {
        tag.clear();
    }
    tag
}

impl Bus for SimDevice {
    fn send_start(&mut self, length: u16) -> Result<(), BusError> {
        self.stats.send_starts += 1;
        if let Some(e) = self.faults.send_start_errors.pop_front() {
            return Err(e);
        }
        if self.inject_ack() {
            return Err(BusError::Ack);
        }
        self.incoming.clear();
        self.expected_len = usize::from(length);
        Ok(())
    }

    fn send_continue(&mut self, data: &[u8]) -> Result<(), BusError> {
        self.incoming.extend_from_slice(data);
        Ok(())
    }

    fn send_stop(&mut self, data: &[u8]) -> Result<(), BusError> {
        self.incoming.extend_from_slice(data);
        self.complete_command();
        Ok(())
    }

    fn recv_start(&mut self, _length: u16) -> Result<(), BusError> {
        self.stats.recv_starts += 1;
        if let Some(e) = self.faults.recv_start_errors.pop_front() {
            return Err(e);
        }
        if self.busy > 0 {
            self.busy -= 1;
            return Err(BusError::Ack);
        }
        if self.inject_ack() {
            return Err(BusError::Ack);
        }
        self.cursor = 0;
        Ok(())
    }

    fn recv_continue(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.read_chunk(buf);
        Ok(())
    }

    fn recv_stop(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.read_chunk(buf);
        Ok(())
    }
}
