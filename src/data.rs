//! Data stream encryptor/decryptor.
//!
//! AES-256-CCM here is one-shot per stream rather than a chunked counter
//! stream like `jolokia/src/pipeline/cipher/chacha.rs`'s
//! `EncryptorBE32`/`DecryptorBE32`: exactly one 13-byte IV is fixed per
//! stream, not a growing counter nonce, so there is no per-chunk framing to
//! maintain. The open-stream API still buffers incrementally and only
//! touches the cipher once, on `finish()`/first
//! read.

use std::io::{self, Read, Write};

use aead::{Aead, KeyInit};
use aes::Aes256;
use ccm::consts::{U13, U16};
use ccm::Ccm;

use crate::error::{Error, Result};
use crate::info::DataMode;
use crate::keywrap::KeyDecryptor;
use crate::rand::RandomSource;
use crate::info::EncryptionInfo;

type Aes256Ccm = Ccm<Aes256, U16, U13>;

pub(crate) fn aes_256_ccm_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Ccm::new(key.into());
    cipher
        .encrypt(iv.into(), plaintext)
        .map_err(|_| Error::InvalidCiphertext)
}

pub(crate) fn aes_256_ccm_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Ccm::new(key.into());
    cipher
        .decrypt(iv.into(), ciphertext)
        .map_err(|_| Error::InvalidCiphertext)
}

/// Encrypts one or more independent streams under a single fresh 256-bit
/// data key.
pub struct DataEncryptor {
    data_mode: DataMode,
    data_key: Option<Vec<u8>>,
    ivs: Vec<Vec<u8>>,
}

impl DataEncryptor {
    /// `stream_count` defaults to 1, `data_mode` to `AES_256_CCM` at the
    /// call site; both are required here since the core
    /// never assumes a default silently.
    pub fn new(random: &mut dyn RandomSource, stream_count: usize, data_mode: DataMode) -> Self {
        match data_mode {
            DataMode::Unencrypted => Self {
                data_mode,
                data_key: None,
                ivs: vec![Vec::new(); stream_count],
            },
            DataMode::Aes256Ccm => {
                let mut data_key = vec![0u8; 32];
                random.fill_bytes(&mut data_key);
                let ivs = distinct_ivs(random, stream_count);
                Self {
                    data_mode,
                    data_key: Some(data_key),
                    ivs,
                }
            }
        }
    }

    pub fn data_mode(&self) -> DataMode {
        self.data_mode
    }

    pub fn stream_count(&self) -> usize {
        self.ivs.len()
    }

    pub fn ivs(&self) -> &[Vec<u8>] {
        &self.ivs
    }

    /// The fresh 256-bit data key, to be wrapped per recipient by a
    /// [`KeyEncryptor`](crate::keywrap::KeyEncryptor). `None` in
    /// `Unencrypted` mode.
    pub fn data_key(&self) -> Option<&[u8]> {
        self.data_key.as_deref()
    }

    fn iv(&self, stream_index: usize) -> Result<&[u8]> {
        self.ivs
            .get(stream_index)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Precondition(format!("no such stream index {stream_index}")))
    }

    pub fn encrypt_data(&self, plaintext: &[u8], stream_index: usize) -> Result<Vec<u8>> {
        match self.data_mode {
            DataMode::Unencrypted => {
                self.iv(stream_index)?;
                Ok(plaintext.to_vec())
            }
            DataMode::Aes256Ccm => {
                let iv = self.iv(stream_index)?;
                let key = self.data_key.as_deref().expect("AES_256_CCM mode always has a data key");
                aes_256_ccm_encrypt(key, iv, plaintext)
            }
        }
    }

    pub fn open_encryption_write_stream<'a>(
        &'a self,
        outer: &'a mut dyn Write,
        stream_index: usize,
        leave_open: bool,
    ) -> EncryptionWriteStream<'a> {
        EncryptionWriteStream {
            encryptor: self,
            stream_index,
            outer,
            buffer: Vec::new(),
            leave_open,
        }
    }

    pub fn open_encryption_read_stream<'a>(
        &'a self,
        inner_plaintext: &'a mut dyn Read,
        stream_index: usize,
        leave_open: bool,
    ) -> EncryptionReadStream<'a> {
        EncryptionReadStream {
            encryptor: self,
            stream_index,
            inner: Some(inner_plaintext),
            cursor: None,
            leave_open,
        }
    }
}

fn distinct_ivs(random: &mut dyn RandomSource, stream_count: usize) -> Vec<Vec<u8>> {
    let mut seen = std::collections::HashSet::new();
    let mut ivs = Vec::with_capacity(stream_count);
    while ivs.len() < stream_count {
        let mut iv = vec![0u8; 13];
        random.fill_bytes(&mut iv);
        if seen.insert(iv.clone()) {
            ivs.push(iv);
        }
    }
    ivs
}

/// Buffers plaintext written to it; encrypting happens once, on
/// [`finish`](Self::finish).
pub struct EncryptionWriteStream<'a> {
    encryptor: &'a DataEncryptor,
    stream_index: usize,
    outer: &'a mut dyn Write,
    buffer: Vec<u8>,
    leave_open: bool,
}

impl Write for EncryptionWriteStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl EncryptionWriteStream<'_> {
    /// Encrypts everything written so far and appends it to `outer`.
    pub fn finish(self) -> Result<()> {
        let ciphertext = self
            .encryptor
            .encrypt_data(&self.buffer, self.stream_index)?;
        self.outer.write_all(&ciphertext)?;
        if !self.leave_open {
            self.outer.flush()?;
        }
        Ok(())
    }

    pub fn leave_open(&self) -> bool {
        self.leave_open
    }
}

/// Reads all of `inner_plaintext` on first poll, encrypts it once, then
/// serves the ciphertext.
pub struct EncryptionReadStream<'a> {
    encryptor: &'a DataEncryptor,
    stream_index: usize,
    inner: Option<&'a mut dyn Read>,
    cursor: Option<io::Cursor<Vec<u8>>>,
    leave_open: bool,
}

impl Read for EncryptionReadStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cursor.is_none() {
            let mut plaintext = Vec::new();
            let inner = self
                .inner
                .take()
                .expect("EncryptionReadStream polled after completion");
            inner.read_to_end(&mut plaintext)?;
            let ciphertext = self
                .encryptor
                .encrypt_data(&plaintext, self.stream_index)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            self.cursor = Some(io::Cursor::new(ciphertext));
        }
        self.cursor.as_mut().expect("just populated above").read(buf)
    }
}

impl EncryptionReadStream<'_> {
    pub fn leave_open(&self) -> bool {
        self.leave_open
    }
}

/// Decrypts one or more independent streams under a data key recovered by
/// a [`KeyDecryptor`].
pub struct DataDecryptor {
    data_mode: DataMode,
    data_key: Option<Vec<u8>>,
    ivs: Vec<Vec<u8>>,
}

impl DataDecryptor {
    /// `None` when `key_decryptor` cannot unwrap any entry in
    /// `info.DataKeys`. In `Unencrypted` mode this always succeeds, even
    /// with `key_decryptor` absent — there is nothing to unwrap.
    pub fn from_encryption_info(
        info: &EncryptionInfo,
        key_decryptor: Option<&KeyDecryptor>,
    ) -> Option<Self> {
        match info.data_mode {
            DataMode::Unencrypted => Some(Self {
                data_mode: DataMode::Unencrypted,
                data_key: None,
                ivs: info.ivs.clone(),
            }),
            DataMode::Aes256Ccm => {
                let data_key = key_decryptor?.decrypt_key(info)?;
                Some(Self {
                    data_mode: DataMode::Aes256Ccm,
                    data_key: Some(data_key),
                    ivs: info.ivs.clone(),
                })
            }
        }
    }

    pub fn stream_count(&self) -> usize {
        self.ivs.len()
    }

    fn iv(&self, stream_index: usize) -> Result<&[u8]> {
        self.ivs
            .get(stream_index)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Precondition(format!("no such stream index {stream_index}")))
    }

    pub fn decrypt_data(&self, ciphertext: &[u8], stream_index: usize) -> Result<Vec<u8>> {
        match self.data_mode {
            DataMode::Unencrypted => {
                self.iv(stream_index)?;
                Ok(ciphertext.to_vec())
            }
            DataMode::Aes256Ccm => {
                let iv = self.iv(stream_index)?;
                let key = self.data_key.as_deref().expect("AES_256_CCM mode always has a data key");
                aes_256_ccm_decrypt(key, iv, ciphertext)
            }
        }
    }

    pub fn open_decryption_write_stream<'a>(
        &'a self,
        outer_plaintext: &'a mut dyn Write,
        stream_index: usize,
        leave_open: bool,
    ) -> DecryptionWriteStream<'a> {
        DecryptionWriteStream {
            decryptor: self,
            stream_index,
            outer: outer_plaintext,
            buffer: Vec::new(),
            leave_open,
        }
    }

    pub fn open_decryption_read_stream<'a>(
        &'a self,
        inner_ciphertext: &'a mut dyn Read,
        stream_index: usize,
        leave_open: bool,
    ) -> DecryptionReadStream<'a> {
        DecryptionReadStream {
            decryptor: self,
            stream_index,
            inner: Some(inner_ciphertext),
            cursor: None,
            leave_open,
        }
    }
}

pub struct DecryptionWriteStream<'a> {
    decryptor: &'a DataDecryptor,
    stream_index: usize,
    outer: &'a mut dyn Write,
    buffer: Vec<u8>,
    leave_open: bool,
}

impl Write for DecryptionWriteStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DecryptionWriteStream<'_> {
    pub fn finish(self) -> Result<()> {
        let plaintext = self
            .decryptor
            .decrypt_data(&self.buffer, self.stream_index)?;
        self.outer.write_all(&plaintext)?;
        if !self.leave_open {
            self.outer.flush()?;
        }
        Ok(())
    }

    pub fn leave_open(&self) -> bool {
        self.leave_open
    }
}

pub struct DecryptionReadStream<'a> {
    decryptor: &'a DataDecryptor,
    stream_index: usize,
    inner: Option<&'a mut dyn Read>,
    cursor: Option<io::Cursor<Vec<u8>>>,
    leave_open: bool,
}

impl Read for DecryptionReadStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cursor.is_none() {
            let mut ciphertext = Vec::new();
            let inner = self
                .inner
                .take()
                .expect("DecryptionReadStream polled after completion");
            inner.read_to_end(&mut ciphertext)?;
            let plaintext = self
                .decryptor
                .decrypt_data(&ciphertext, self.stream_index)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            self.cursor = Some(io::Cursor::new(plaintext));
        }
        self.cursor.as_mut().expect("just populated above").read(buf)
    }
}

impl DecryptionReadStream<'_> {
    pub fn leave_open(&self) -> bool {
        self.leave_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rand::OsRandomSource;

    #[test]
    fn aes_256_ccm_mode_round_trips_multiple_streams() {
        let mut rng = OsRandomSource;
        let encryptor = DataEncryptor::new(&mut rng, 3, DataMode::Aes256Ccm);
        let plaintexts: Vec<Vec<u8>> = vec![b"stream zero".to_vec(), b"stream one".to_vec(), b"stream two, a little longer".to_vec()];

        let ciphertexts: Vec<Vec<u8>> = plaintexts
            .iter()
            .enumerate()
            .map(|(i, pt)| encryptor.encrypt_data(pt, i).unwrap())
            .collect();

        let data_key = encryptor.data_key().unwrap().to_vec();
        let decryptor_ivs = encryptor.ivs().to_vec();
        // Reconstruct the decryptor the way `from_encryption_info` would,
        // without routing through key-unwrap.
        let decryptor = DataDecryptor {
            data_mode: DataMode::Aes256Ccm,
            data_key: Some(data_key),
            ivs: decryptor_ivs,
        };

        for (i, ciphertext) in ciphertexts.iter().enumerate() {
            assert_eq!(decryptor.decrypt_data(ciphertext, i).unwrap(), plaintexts[i]);
        }
    }

    #[test]
    fn wrong_stream_index_fails_authentication() {
        let mut rng = OsRandomSource;
        let encryptor = DataEncryptor::new(&mut rng, 2, DataMode::Aes256Ccm);
        let ciphertext = encryptor.encrypt_data(b"for stream zero", 0).unwrap();

        let decryptor = DataDecryptor {
            data_mode: DataMode::Aes256Ccm,
            data_key: Some(encryptor.data_key().unwrap().to_vec()),
            ivs: encryptor.ivs().to_vec(),
        };

        assert_eq!(
            decryptor.decrypt_data(&ciphertext, 1).unwrap_err(),
            Error::InvalidCiphertext
        );
    }

    #[test]
    fn out_of_range_stream_index_is_a_precondition_violation() {
        let mut rng = OsRandomSource;
        let encryptor = DataEncryptor::new(&mut rng, 1, DataMode::Aes256Ccm);
        assert!(matches!(
            encryptor.encrypt_data(b"x", 5).unwrap_err(),
            Error::Precondition(_)
        ));
    }

    #[test]
    fn unencrypted_mode_passes_bytes_through_unchanged() {
        let mut rng = OsRandomSource;
        let encryptor = DataEncryptor::new(&mut rng, 1, DataMode::Unencrypted);
        assert!(encryptor.data_key().is_none());
        let ciphertext = encryptor.encrypt_data(b"plain as day", 0).unwrap();
        assert_eq!(ciphertext, b"plain as day");

        let decryptor = DataDecryptor {
            data_mode: DataMode::Unencrypted,
            data_key: None,
            ivs: encryptor.ivs().to_vec(),
        };
        assert_eq!(decryptor.decrypt_data(&ciphertext, 0).unwrap(), b"plain as day");
    }

    #[test]
    fn write_stream_buffers_then_encrypts_once_on_finish() {
        let mut rng = OsRandomSource;
        let encryptor = DataEncryptor::new(&mut rng, 1, DataMode::Aes256Ccm);
        let mut outer = Vec::new();
        {
            let mut stream = encryptor.open_encryption_write_stream(&mut outer, 0, false);
            stream.write_all(b"hello, ").unwrap();
            stream.write_all(b"world!").unwrap();
            stream.finish().unwrap();
        }
        let decryptor = DataDecryptor {
            data_mode: DataMode::Aes256Ccm,
            data_key: Some(encryptor.data_key().unwrap().to_vec()),
            ivs: encryptor.ivs().to_vec(),
        };
        assert_eq!(decryptor.decrypt_data(&outer, 0).unwrap(), b"hello, world!");
    }

    #[test]
    fn read_stream_encrypts_lazily_on_first_read() {
        let mut rng = OsRandomSource;
        let encryptor = DataEncryptor::new(&mut rng, 1, DataMode::Aes256Ccm);
        let mut source = io::Cursor::new(b"streamed plaintext".to_vec());
        let mut stream = encryptor.open_encryption_read_stream(&mut source, 0, false);
        let mut ciphertext = Vec::new();
        stream.read_to_end(&mut ciphertext).unwrap();

        let decryptor = DataDecryptor {
            data_mode: DataMode::Aes256Ccm,
            data_key: Some(encryptor.data_key().unwrap().to_vec()),
            ivs: encryptor.ivs().to_vec(),
        };
        assert_eq!(
            decryptor.decrypt_data(&ciphertext, 0).unwrap(),
            b"streamed plaintext"
        );
    }
}
