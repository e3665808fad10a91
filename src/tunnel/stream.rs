//! Upstream wire framing: `[IV] [encrypted(TargetAddress || payload)]`.

use crate::cipher::{Cipher, KeystreamCipher};
use crate::socks5::TargetAddress;
use crate::util::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// One dialed connection to an upstream tunnel server. Wraps the raw TCP
/// socket with per-direction keystream state; the first write emits this
/// connection's IV in cleartext, the first read consumes the remote's IV.
pub struct UpstreamStream {
    socket: TcpStream,
    cipher: Cipher,
    encryptor: Option<Box<dyn KeystreamCipher>>,
    decryptor: Option<Box<dyn KeystreamCipher>>,
}

impl UpstreamStream {
    /// Dial `endpoint` and perform the handshake: emit our IV, then write
    /// the target address as the first encrypted application bytes.
    pub async fn dial(endpoint: &str, cipher: Cipher, target: &TargetAddress) -> Result<Self> {
        let socket = TcpStream::connect(endpoint).await?;
        crate::util::net::configure_tcp_stream(&socket, endpoint);

        let mut stream = Self {
            socket,
            cipher,
            encryptor: None,
            decryptor: None,
        };
        stream.write_app(target.as_bytes()).await?;
        Ok(stream)
    }

    /// Encrypt and write application bytes, prepending this direction's IV
    /// on the very first call.
    pub async fn write_app(&mut self, data: &[u8]) -> Result<()> {
        let first_write = self.encryptor.is_none();
        let iv = if first_write {
            Some(self.cipher.generate_iv())
        } else {
            None
        };
        if let Some(iv) = &iv {
            self.encryptor = Some(self.cipher.encryptor(iv));
        }

        let mut buf = data.to_vec();
        self.encryptor
            .as_mut()
            .expect("encryptor initialized above")
            .apply(&mut buf);

        if let Some(iv) = iv {
            self.socket.write_all(&iv).await?;
        }
        self.socket.write_all(&buf).await?;
        self.socket.flush().await?;
        Ok(())
    }

    /// Read and decrypt up to `buf.len()` bytes of application data,
    /// consuming the remote's IV first if this is the first read.
    pub async fn read_app(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.decryptor.is_none() {
            let mut iv = vec![0u8; self.cipher.iv_len()];
            self.socket.read_exact(&mut iv).await?;
            self.decryptor = Some(self.cipher.decryptor(&iv));
        }

        let n = self.socket.read(buf).await?;
        if n > 0 {
            self.decryptor
                .as_mut()
                .expect("decryptor initialized above")
                .apply(&mut buf[..n]);
        }
        Ok(n)
    }
}
