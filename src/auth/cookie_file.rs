use std::io::Write;
use std::path::{Path, PathBuf};

use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use colored::Colorize;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::CookieSink;
use super::errors::{AuthError, Result};
use crate::common::models::AuthCookies;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: u8 = 0x80;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;

/// 本机信息派生密钥，换一台机器就解不开
fn machine_seed() -> String {
    let host = std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}-{}-bilidl", host, std::env::consts::ARCH)
}

/// AES-128-CBC 加密，HMAC-SHA256 校验，整体 base64 编码
#[derive(Clone)]
struct CookieCipher {
    signing_key: [u8; 16],
    encryption_key: [u8; 16],
}

impl CookieCipher {
    fn from_seed(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        let mut signing_key = [0u8; 16];
        let mut encryption_key = [0u8; 16];
        signing_key.copy_from_slice(&digest[..16]);
        encryption_key.copy_from_slice(&digest[16..]);
        Self {
            signing_key,
            encryption_key,
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let iv: [u8; IV_LEN] = rand::random();
        let ciphertext = Aes128CbcEnc::new_from_slices(&self.encryption_key, &iv)
            .map_err(|e| AuthError::CookieCipher(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut token = Vec::with_capacity(1 + IV_LEN + ciphertext.len() + TAG_LEN);
        token.push(TOKEN_VERSION);
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);
        let tag = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&tag);

        Ok(URL_SAFE.encode(token))
    }

    fn decrypt(&self, text: &str) -> Result<Vec<u8>> {
        let token = URL_SAFE
            .decode(text.trim())
            .map_err(|e| AuthError::CookieCipher(e.to_string()))?;
        if token.len() < 1 + IV_LEN + TAG_LEN || token[0] != TOKEN_VERSION {
            return Err(AuthError::CookieCipher("文件格式不正确".to_string()));
        }

        let (signed, tag) = token.split_at(token.len() - TAG_LEN);
        self.mac(signed)?
            .verify_slice(tag)
            .map_err(|_| AuthError::CookieCipher("校验失败".to_string()))?;

        let (iv, ciphertext) = signed[1..].split_at(IV_LEN);
        Aes128CbcDec::new_from_slices(&self.encryption_key, iv)
            .map_err(|e| AuthError::CookieCipher(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| AuthError::CookieCipher("解密失败".to_string()))
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key)
            .map_err(|e| AuthError::CookieCipher(e.to_string()))?;
        mac.update(data);
        Ok(mac)
    }
}

/// 加密保存到本地文件，下次启动可直接复用。文件只有当前用户可读写
#[derive(Clone)]
pub struct FileCookieSink {
    path: PathBuf,
    cipher: CookieCipher,
}

impl std::fmt::Debug for FileCookieSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCookieSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileCookieSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_key_seed(path, &machine_seed())
    }

    pub fn with_key_seed(path: impl Into<PathBuf>, seed: &str) -> Self {
        Self {
            path: path.into(),
            cipher: CookieCipher::from_seed(seed),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在、读不了或解不开时都当作没有登录信息
    pub fn load(&self) -> Option<AuthCookies> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("无法读取 Cookie 文件 {:?}: {}", self.path, e);
                return None;
            }
        };

        let cookies = self
            .cipher
            .decrypt(&text)
            .and_then(|plaintext| Ok(serde_json::from_slice::<AuthCookies>(&plaintext)?));
        match cookies {
            Ok(cookies) => Some(cookies),
            Err(e) => {
                warn!("Cookie 文件已损坏或不属于本机，忽略: {}", e);
                None
            }
        }
    }
}

impl CookieSink for FileCookieSink {
    fn store(&self, cookies: &AuthCookies) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let token = self.cipher.encrypt(&serde_json::to_vec(cookies)?)?;
        write_private(&self.path, token.as_bytes())?;
        info!("{}: {:?}", "会话已保存".green(), self.path);
        Ok(())
    }
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // 已存在的文件不受 mode 影响，单独收紧权限
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()
}
