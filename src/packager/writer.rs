//! Signed zip writer
//!
//! Every entry written through [`SignedArchiveWriter`] is digested as it is
//! streamed into the container. Closing the writer turns those digests into
//! the jar manifest and, when a [`Signer`] is present, the signature file and
//! signature block:
//!
//! | Entry                  | Contents                                        |
//! |------------------------|-------------------------------------------------|
//! | `META-INF/MANIFEST.MF` | SHA-256 digest of every entry                   |
//! | `META-INF/CERT.SF`     | digest of the manifest and of each stanza       |
//! | `META-INF/CERT.RSA`    | signer certificate and signature over `CERT.SF` |

use super::signer::Signer;
use crate::error::{DroidpackError, DroidpackResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
const SIGNATURE_FILE_NAME: &str = "META-INF/CERT.SF";
const SIGNATURE_BLOCK_STEM: &str = "META-INF/CERT";

/// Magic prefix of the signature block container
const SIGNATURE_BLOCK_MAGIC: &[u8; 4] = b"DPSB";

/// Max bytes per manifest line, excluding the line break
const MAX_LINE_BYTES: usize = 72;

const CREATED_BY: &str = concat!("droidpack ", env!("CARGO_PKG_VERSION"));

/// What to do with one entry of a source zip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    Write,
    Skip,
    /// Hand the entry's bytes to [`EntryFilter::divert`] instead of writing it
    Divert,
}

/// Decides, entry by entry, how a source zip is copied
pub trait EntryFilter {
    fn check(&mut self, archive_path: &str) -> DroidpackResult<EntryAction>;

    /// Receives the bytes of every entry `check` answered with
    /// [`EntryAction::Divert`]
    fn divert(&mut self, archive_path: &str, data: &mut dyn Read) -> DroidpackResult<()>;
}

/// Zip writer that records a digest per entry and signs on close
pub struct SignedArchiveWriter {
    path: PathBuf,
    zip: ZipWriter<File>,
    signer: Option<Arc<dyn Signer>>,
    no_compress: Vec<String>,
    manifest: BTreeMap<String, String>,
}

impl SignedArchiveWriter {
    /// Create (or truncate) the archive at `path`.
    ///
    /// Files whose extension appears in `no_compress` are stored rather than
    /// deflated when added with [`write_file`](Self::write_file).
    pub fn create(
        path: impl Into<PathBuf>,
        signer: Option<Arc<dyn Signer>>,
        no_compress: &[String],
    ) -> DroidpackResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DroidpackError::io(format!("creating directory {}", parent.display()), e))?;
        }
        let file = File::create(&path)
            .map_err(|e| DroidpackError::io(format!("creating {}", path.display()), e))?;

        Ok(Self {
            path,
            zip: ZipWriter::new(file),
            signer,
            no_compress: no_compress
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            manifest: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of digested entries so far
    pub fn entry_count(&self) -> usize {
        self.manifest.len()
    }

    /// Add `file` under `archive_path`
    pub fn write_file(&mut self, file: &Path, archive_path: &str) -> DroidpackResult<()> {
        let mut input =
            File::open(file).map_err(|e| DroidpackError::io(format!("opening {}", file.display()), e))?;
        let method = self.method_for(archive_path);
        self.write_entry(archive_path, method, &mut input)
            .map_err(|e| match e {
                DroidpackError::Io { source, .. } => {
                    DroidpackError::io(format!("adding {} from {}", archive_path, file.display()), source)
                }
                other => other,
            })
    }

    /// Copy entries of `zip_path`, consulting `filter` for each
    pub fn write_zip_entries(&mut self, zip_path: &Path, filter: &mut dyn EntryFilter) -> DroidpackResult<()> {
        let file = File::open(zip_path)
            .map_err(|e| DroidpackError::io(format!("opening {}", zip_path.display()), e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| DroidpackError::zip(zip_path, e))?;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| DroidpackError::zip(zip_path, e))?;
            let name = entry.name().to_string();

            match filter.check(&name)? {
                EntryAction::Skip => continue,
                EntryAction::Divert => filter.divert(&name, &mut entry)?,
                EntryAction::Write => {
                    let method = match entry.compression() {
                        CompressionMethod::Stored => CompressionMethod::Stored,
                        _ => CompressionMethod::Deflated,
                    };
                    self.write_entry(&name, method, &mut entry).map_err(|e| match e {
                        DroidpackError::Io { source, .. } => DroidpackError::io(
                            format!("copying {} from {}", name, zip_path.display()),
                            source,
                        ),
                        other => other,
                    })?;
                }
            }
        }
        Ok(())
    }

    fn method_for(&self, archive_path: &str) -> CompressionMethod {
        let stored = Path::new(archive_path)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.no_compress.iter().any(|n| n.eq_ignore_ascii_case(ext)));
        if stored {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        }
    }

    fn write_entry(
        &mut self,
        archive_path: &str,
        method: CompressionMethod,
        data: &mut dyn Read,
    ) -> DroidpackResult<()> {
        let options = FileOptions::default().compression_method(method);
        self.zip
            .start_file(archive_path, options)
            .map_err(|e| DroidpackError::zip(&self.path, e))?;

        let mut sink = DigestWriter::new(&mut self.zip);
        io::copy(data, &mut sink).map_err(|e| DroidpackError::io(format!("writing {}", archive_path), e))?;
        let digest = sink.finish();

        self.manifest.insert(archive_path.to_string(), BASE64.encode(digest));
        Ok(())
    }

    fn write_bytes(&mut self, archive_path: &str, bytes: &[u8]) -> DroidpackResult<()> {
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        self.zip
            .start_file(archive_path, options)
            .map_err(|e| DroidpackError::zip(&self.path, e))?;
        self.zip
            .write_all(bytes)
            .map_err(|e| DroidpackError::io(format!("writing {}", archive_path), e))
    }

    /// Write the manifest and signature entries, then finish the container
    pub fn close(mut self) -> DroidpackResult<PathBuf> {
        let manifest = ManifestText::build(&self.manifest);
        self.write_bytes(MANIFEST_NAME, manifest.text.as_bytes())?;

        if let Some(signer) = self.signer.clone() {
            let signature_file = signature_file(&manifest);
            self.write_bytes(SIGNATURE_FILE_NAME, &signature_file)?;

            let signature = signer.sign(&signature_file)?;
            let block = signature_block(signer.certificate(), &signature);
            let block_name = format!("{}.{}", SIGNATURE_BLOCK_STEM, signer.block_extension());
            self.write_bytes(&block_name, &block)?;
        }

        self.zip.finish().map_err(|e| DroidpackError::zip(&self.path, e))?;
        debug!("Wrote {} ({} entries)", self.path.display(), self.manifest.len());
        Ok(self.path)
    }

    /// Drop the partial container and delete it from disk
    pub fn abort(self) {
        let Self { path, zip, .. } = self;
        drop(zip);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("Could not remove partial archive {}: {}", path.display(), e);
            }
        }
    }
}

/// Forwards writes while hashing exactly the bytes accepted downstream
struct DigestWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: Sha256,
}

impl<'a, W: Write> DigestWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> Vec<u8> {
        self.hasher.finalize().to_vec()
    }
}

impl<W: Write> Write for DigestWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Serialized manifest along with each entry stanza, in order
struct ManifestText {
    text: String,
    stanzas: Vec<(String, String)>,
}

impl ManifestText {
    fn build(digests: &BTreeMap<String, String>) -> Self {
        let mut text = String::new();
        push_header(&mut text, "Manifest-Version", "1.0");
        push_header(&mut text, "Created-By", CREATED_BY);
        text.push_str("\r\n");

        let mut stanzas = Vec::with_capacity(digests.len());
        for (name, digest) in digests {
            let mut stanza = String::new();
            push_header(&mut stanza, "Name", name);
            push_header(&mut stanza, "SHA-256-Digest", digest);
            stanza.push_str("\r\n");
            text.push_str(&stanza);
            stanzas.push((name.clone(), stanza));
        }
        Self { text, stanzas }
    }
}

/// Signature file over `manifest`.
///
/// Some verifiers mis-read a signature file whose length is an exact
/// multiple of 1024 bytes, so such files get a trailing line break.
fn signature_file(manifest: &ManifestText) -> Vec<u8> {
    let mut text = String::new();
    push_header(&mut text, "Signature-Version", "1.0");
    push_header(&mut text, "Created-By", CREATED_BY);
    push_header(
        &mut text,
        "SHA-256-Digest-Manifest",
        &BASE64.encode(Sha256::digest(manifest.text.as_bytes())),
    );
    text.push_str("\r\n");

    for (name, stanza) in &manifest.stanzas {
        push_header(&mut text, "Name", name);
        push_header(&mut text, "SHA-256-Digest", &BASE64.encode(Sha256::digest(stanza.as_bytes())));
        text.push_str("\r\n");
    }

    let mut bytes = text.into_bytes();
    pad_signature_file(&mut bytes);
    bytes
}

fn pad_signature_file(bytes: &mut Vec<u8>) {
    if !bytes.is_empty() && bytes.len() % 1024 == 0 {
        bytes.extend_from_slice(b"\r\n");
    }
}

/// `DPSB`, then the certificate and the signature, each prefixed with its
/// big-endian u32 length
fn signature_block(certificate: &[u8], signature: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(12 + certificate.len() + signature.len());
    block.extend_from_slice(SIGNATURE_BLOCK_MAGIC);
    block.extend_from_slice(&(certificate.len() as u32).to_be_bytes());
    block.extend_from_slice(certificate);
    block.extend_from_slice(&(signature.len() as u32).to_be_bytes());
    block.extend_from_slice(signature);
    block
}

/// Append `name: value` wrapped at [`MAX_LINE_BYTES`], continuation lines
/// starting with a single space
fn push_header(out: &mut String, name: &str, value: &str) {
    let line = format!("{}: {}", name, value);
    let mut rest = line.as_str();
    let mut limit = MAX_LINE_BYTES;
    loop {
        if rest.len() <= limit {
            out.push_str(rest);
            out.push_str("\r\n");
            return;
        }
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n ");
        rest = &rest[cut..];
        limit = MAX_LINE_BYTES - 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::signer::tests::test_signer;
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
    use tempfile::TempDir;

    struct KeepAll;

    impl EntryFilter for KeepAll {
        fn check(&mut self, _archive_path: &str) -> DroidpackResult<EntryAction> {
            Ok(EntryAction::Write)
        }

        fn divert(&mut self, archive_path: &str, _data: &mut dyn Read) -> DroidpackResult<()> {
            panic!("KeepAll never diverts, got {}", archive_path)
        }
    }

    fn read_entry(apk: &Path, name: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(File::open(apk).unwrap()).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        bytes
    }

    fn entry_names(apk: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(apk).unwrap()).unwrap();
        archive.file_names().map(String::from).collect()
    }

    fn make_zip(path: &Path, entries: &[(&str, &[u8], CompressionMethod)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data, method) in entries {
            zip.start_file(*name, FileOptions::default().compression_method(*method))
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn manifest_lists_entry_digests() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("hello.txt");
        std::fs::write(&source, b"hello").unwrap();
        let apk = dir.path().join("out.apk");

        let mut writer = SignedArchiveWriter::create(&apk, None, &[]).unwrap();
        writer.write_file(&source, "assets/hello.txt").unwrap();
        writer.close().unwrap();

        let manifest = String::from_utf8(read_entry(&apk, MANIFEST_NAME)).unwrap();
        let expected = BASE64.encode(Sha256::digest(b"hello"));
        assert!(manifest.starts_with("Manifest-Version: 1.0\r\n"));
        assert!(manifest.contains("Name: assets/hello.txt\r\n"));
        assert!(manifest.contains(&format!("SHA-256-Digest: {}\r\n", expected)));

        // unsigned: no signature entries
        let names = entry_names(&apk);
        assert!(!names.iter().any(|n| n == SIGNATURE_FILE_NAME));
        assert_eq!(read_entry(&apk, "assets/hello.txt"), b"hello");
    }

    #[test]
    fn signed_archive_carries_verifiable_signature() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("classes.dex");
        std::fs::write(&source, b"dex\n035").unwrap();
        let apk = dir.path().join("signed.apk");

        let signer = Arc::new(test_signer());
        let mut writer = SignedArchiveWriter::create(&apk, Some(signer.clone()), &[]).unwrap();
        writer.write_file(&source, "classes.dex").unwrap();
        writer.close().unwrap();

        let manifest = read_entry(&apk, MANIFEST_NAME);
        let sf = read_entry(&apk, SIGNATURE_FILE_NAME);
        let sf_text = String::from_utf8(sf.clone()).unwrap();
        let manifest_digest = BASE64.encode(Sha256::digest(&manifest));
        assert!(sf_text.contains(&format!("SHA-256-Digest-Manifest: {}\r\n", manifest_digest)));
        assert!(sf_text.contains("Name: classes.dex\r\n"));

        let block = read_entry(&apk, "META-INF/CERT.RSA");
        assert_eq!(&block[..4], SIGNATURE_BLOCK_MAGIC);
        let cert_len = u32::from_be_bytes(block[4..8].try_into().unwrap()) as usize;
        assert_eq!(&block[8..8 + cert_len], signer.certificate());
        let sig_start = 8 + cert_len + 4;
        let signature = &block[sig_start..];

        let key = RsaPrivateKey::from_pkcs8_pem(crate::packager::signer::tests::TEST_KEY).unwrap();
        RsaPublicKey::from(&key)
            .verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(&sf), signature)
            .unwrap();
    }

    #[test]
    fn zip_entries_keep_compression_and_honor_filter() {
        let dir = TempDir::new().unwrap();
        let res = dir.path().join("resources.ap_");
        make_zip(
            &res,
            &[
                ("AndroidManifest.xml", b"<manifest/>", CompressionMethod::Deflated),
                ("res/raw/song.ogg", b"ogg", CompressionMethod::Stored),
                ("META-INF/NOTICE", b"notice", CompressionMethod::Deflated),
                ("Foo.class", b"cafebabe", CompressionMethod::Deflated),
            ],
        );

        struct Filter {
            diverted: Vec<(String, Vec<u8>)>,
        }
        impl EntryFilter for Filter {
            fn check(&mut self, archive_path: &str) -> DroidpackResult<EntryAction> {
                Ok(match archive_path {
                    "Foo.class" => EntryAction::Skip,
                    "META-INF/NOTICE" => EntryAction::Divert,
                    _ => EntryAction::Write,
                })
            }
            fn divert(&mut self, archive_path: &str, data: &mut dyn Read) -> DroidpackResult<()> {
                let mut bytes = Vec::new();
                data.read_to_end(&mut bytes).unwrap();
                self.diverted.push((archive_path.to_string(), bytes));
                Ok(())
            }
        }

        let apk = dir.path().join("out.apk");
        let mut filter = Filter { diverted: Vec::new() };
        let mut writer = SignedArchiveWriter::create(&apk, None, &[]).unwrap();
        writer.write_zip_entries(&res, &mut filter).unwrap();
        assert_eq!(writer.entry_count(), 2);
        writer.close().unwrap();

        assert_eq!(filter.diverted, vec![("META-INF/NOTICE".to_string(), b"notice".to_vec())]);

        let mut archive = ZipArchive::new(File::open(&apk).unwrap()).unwrap();
        assert_eq!(
            archive.by_name("res/raw/song.ogg").unwrap().compression(),
            CompressionMethod::Stored
        );
        assert_eq!(
            archive.by_name("AndroidManifest.xml").unwrap().compression(),
            CompressionMethod::Deflated
        );
        assert!(archive.by_name("Foo.class").is_err());
    }

    #[test]
    fn no_compress_extensions_are_stored() {
        let dir = TempDir::new().unwrap();
        let png = dir.path().join("icon.png");
        std::fs::write(&png, b"png").unwrap();
        let apk = dir.path().join("out.apk");

        let mut writer = SignedArchiveWriter::create(&apk, None, &[".PNG".to_string()]).unwrap();
        writer.write_file(&png, "res/icon.png").unwrap();
        writer.write_file(&png, "res/icon.bin").unwrap();
        writer.close().unwrap();

        let mut archive = ZipArchive::new(File::open(&apk).unwrap()).unwrap();
        assert_eq!(archive.by_name("res/icon.png").unwrap().compression(), CompressionMethod::Stored);
        assert_eq!(archive.by_name("res/icon.bin").unwrap().compression(), CompressionMethod::Deflated);
    }

    #[test]
    fn abort_removes_partial_archive() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("partial.apk");
        let writer = SignedArchiveWriter::create(&apk, None, &[]).unwrap();
        assert!(apk.exists());
        writer.abort();
        assert!(!apk.exists());
    }

    #[test]
    fn long_headers_wrap_at_72_bytes() {
        let name = format!("assets/{}.txt", "x".repeat(150));
        let mut out = String::new();
        push_header(&mut out, "Name", &name);

        let lines: Vec<&str> = out.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert!(lines.len() > 2);
        assert!(lines.iter().all(|l| l.len() <= MAX_LINE_BYTES));
        assert!(lines[1..].iter().all(|l| l.starts_with(' ')));
        let joined: String = lines
            .iter()
            .enumerate()
            .map(|(i, l)| if i == 0 { *l } else { &l[1..] })
            .collect();
        assert_eq!(joined, format!("Name: {}", name));
    }

    #[test]
    fn wrapping_respects_char_boundaries() {
        let mut out = String::new();
        push_header(&mut out, "Name", &"é".repeat(60));
        assert!(out.split("\r\n").all(|l| l.len() <= MAX_LINE_BYTES));
        assert!(String::from_utf8(out.into_bytes()).is_ok());
    }

    #[test]
    fn signature_file_multiple_of_1024_gets_padding() {
        let mut exact = vec![b'a'; 2048];
        pad_signature_file(&mut exact);
        assert_eq!(exact.len(), 2050);
        assert!(exact.ends_with(b"\r\n"));

        let mut other = vec![b'a'; 1000];
        pad_signature_file(&mut other);
        assert_eq!(other.len(), 1000);
    }

    #[test]
    fn keep_all_copies_every_entry() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("in.zip");
        make_zip(&src, &[("a.txt", b"a", CompressionMethod::Deflated)]);
        let apk = dir.path().join("out.apk");
        let mut writer = SignedArchiveWriter::create(&apk, None, &[]).unwrap();
        writer.write_zip_entries(&src, &mut KeepAll).unwrap();
        writer.close().unwrap();
        assert_eq!(read_entry(&apk, "a.txt"), b"a");
    }
}
