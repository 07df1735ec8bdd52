//! SHA-256 digest computation and stream verification.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use a3s_transfer_core::error::{OciError, Result};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use super::descriptor::Descriptor;

/// The only digest algorithm the engines verify.
pub const SHA256: &str = "sha256";

/// Digest string (`sha256:<hex>`) of an in-memory buffer.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{}:{}", SHA256, hex::encode(Sha256::digest(data)))
}

/// Split `alg:hex` into its parts, rejecting anything that is not a
/// lowercase-hex sha256 digest.
pub fn parse_digest(digest: &str) -> Result<(&str, &str)> {
    let invalid = || OciError::InvalidPath(format!("invalid digest '{}'", digest));
    let (alg, encoded) = digest.split_once(':').ok_or_else(invalid)?;
    if alg != SHA256
        || encoded.len() != 64
        || !encoded.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return Err(invalid());
    }
    Ok((alg, encoded))
}

/// Size and hex SHA-256 of a file, streamed in chunks.
pub async fn sha256_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hex::encode(hasher.finalize())))
}

/// Running hash and byte count of a stream.
#[derive(Clone, Default)]
pub struct DigestVerifier {
    hasher: Sha256,
    size: u64,
}

impl DigestVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.size += data.len() as u64;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Digest of everything seen so far.
    pub fn digest(&self) -> String {
        format!("{}:{}", SHA256, hex::encode(self.hasher.clone().finalize()))
    }

    /// Check the stream against a descriptor's size and digest.
    pub fn verify(&self, expected: &Descriptor) -> Result<()> {
        if expected.algorithm() != SHA256 {
            return Err(OciError::Integrity {
                subject: expected.digest.clone(),
                expected: format!("{} digest", SHA256),
                actual: format!("unsupported algorithm '{}'", expected.algorithm()),
            });
        }
        if self.size != expected.size {
            return Err(OciError::Integrity {
                subject: expected.digest.clone(),
                expected: format!("{} bytes", expected.size),
                actual: format!("{} bytes", self.size),
            });
        }
        let actual = self.digest();
        if actual != expected.digest {
            return Err(OciError::Integrity {
                subject: expected.digest.clone(),
                expected: expected.digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// `AsyncWrite` adapter that hashes everything written through it.
pub struct VerifyingWriter<W> {
    inner: W,
    verifier: DigestVerifier,
}

impl<W> VerifyingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            verifier: DigestVerifier::new(),
        }
    }

    pub fn verifier(&self) -> &DigestVerifier {
        &self.verifier
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for VerifyingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.verifier.update(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// `AsyncRead` adapter that hashes everything read through it.
pub struct VerifyingReader<R> {
    inner: R,
    verifier: DigestVerifier,
}

impl<R> VerifyingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            verifier: DigestVerifier::new(),
        }
    }

    pub fn verifier(&self) -> &DigestVerifier {
        &self.verifier
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for VerifyingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.verifier.update(&buf.filled()[before..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    // sha256("hello")
    const HELLO: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_digest() {
        assert_eq!(sha256_digest(b"hello"), HELLO);
    }

    #[test]
    fn test_parse_digest() {
        let (alg, hex) = parse_digest(HELLO).unwrap();
        assert_eq!(alg, "sha256");
        assert_eq!(hex.len(), 64);
        assert!(parse_digest("sha256:../../etc").is_err());
        assert!(parse_digest("md5:abcd").is_err());
        assert!(parse_digest("nocolon").is_err());
    }

    #[test]
    fn test_verify_ok() {
        let mut v = DigestVerifier::new();
        v.update(b"hel");
        v.update(b"lo");
        v.verify(&Descriptor::new("", HELLO, 5)).unwrap();
    }

    #[test]
    fn test_verify_size_mismatch() {
        let mut v = DigestVerifier::new();
        v.update(b"hello");
        let err = v.verify(&Descriptor::new("", HELLO, 6)).unwrap_err();
        assert!(matches!(err, OciError::Integrity { .. }));
    }

    #[test]
    fn test_verify_digest_mismatch() {
        let mut v = DigestVerifier::new();
        v.update(b"jello");
        let err = v.verify(&Descriptor::new("", HELLO, 5)).unwrap_err();
        match err {
            OciError::Integrity { actual, .. } => assert_eq!(actual, sha256_digest(b"jello")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verify_unsupported_algorithm() {
        let v = DigestVerifier::new();
        assert!(v.verify(&Descriptor::new("", "sha512:abc", 0)).is_err());
    }

    #[tokio::test]
    async fn test_verifying_writer_and_reader() {
        let mut writer = VerifyingWriter::new(Vec::<u8>::new());
        writer.write_all(b"hello").await.unwrap();
        assert_eq!(writer.verifier().digest(), HELLO);

        let mut reader = VerifyingReader::new(&b"hello"[..]);
        let mut out: Vec<u8> = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(reader.verifier().size(), 5);
        assert_eq!(reader.verifier().digest(), HELLO);
    }

    #[tokio::test]
    async fn test_sha256_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        let (size, hex) = sha256_file(&path).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(format!("sha256:{}", hex), HELLO);
    }
}
