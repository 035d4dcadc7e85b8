//! Password-hash gateway.
//!
//! The parsers never hash anything themselves: they hand the plaintext to
//! a [`PasswordEncoder`] and only verify that the result begins with the
//! `{SCHEME}` prefix the scheme calls for. [`BuiltinEncoder`] is the stock
//! implementation; callers with their own hashing policy substitute their
//! own gateway.

use md5::Md5;
use sha1::{Digest as _, Sha1};

use crate::base64;

/// The password schemes an edited file may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Sha,
    Ssha,
    Md5,
    Smd5,
    Crypt,
    CryptMd5,
}

impl Scheme {
    /// Parse an inline encoding token such as `sha` or `cryptmd5`.
    pub fn from_token(token: &str) -> Option<Scheme> {
        if token.eq_ignore_ascii_case("sha") {
            Some(Scheme::Sha)
        } else if token.eq_ignore_ascii_case("ssha") {
            Some(Scheme::Ssha)
        } else if token.eq_ignore_ascii_case("md5") {
            Some(Scheme::Md5)
        } else if token.eq_ignore_ascii_case("smd5") {
            Some(Scheme::Smd5)
        } else if token.eq_ignore_ascii_case("crypt") {
            Some(Scheme::Crypt)
        } else if token.eq_ignore_ascii_case("cryptmd5") {
            Some(Scheme::CryptMd5)
        } else {
            None
        }
    }

    /// The prefix a conforming encoder must put on its output.
    pub fn prefix(self) -> &'static str {
        match self {
            Scheme::Sha => "{SHA}",
            Scheme::Ssha => "{SSHA}",
            Scheme::Md5 => "{MD5}",
            Scheme::Smd5 => "{SMD5}",
            Scheme::Crypt | Scheme::CryptMd5 => "{CRYPT}",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(pub String);

/// External collaborator that turns a plaintext into a prefixed hash.
pub trait PasswordEncoder {
    fn encode(&self, scheme: Scheme, plaintext: &str) -> Result<Vec<u8>, PasswordError>;
}

/// Stock encoder: RustCrypto digests for the SHA/MD5 families, the
/// platform `crypt(3)` for the crypt variants.
#[derive(Debug, Default)]
pub struct BuiltinEncoder;

impl PasswordEncoder for BuiltinEncoder {
    fn encode(&self, scheme: Scheme, plaintext: &str) -> Result<Vec<u8>, PasswordError> {
        let out = match scheme {
            Scheme::Sha => sha_digest(plaintext, None),
            Scheme::Ssha => sha_digest(plaintext, Some(random_salt())),
            Scheme::Md5 => md5_digest(plaintext, None),
            Scheme::Smd5 => md5_digest(plaintext, Some(random_salt())),
            Scheme::Crypt => format!("{{CRYPT}}{}", crypt_des(plaintext)?),
            Scheme::CryptMd5 => format!("{{CRYPT}}{}", crypt_md5(plaintext)?),
        };
        Ok(out.into_bytes())
    }
}

/// `{SHA}`/`{SSHA}`: SHA1 of plaintext (plus salt), salt appended to the
/// digest before base64.
fn sha_digest(plaintext: &str, salt: Option<[u8; 4]>) -> String {
    let mut hasher = Sha1::new();
    hasher.update(plaintext.as_bytes());
    if let Some(salt) = &salt {
        hasher.update(salt);
    }
    let digest = hasher.finalize();
    let mut raw = digest.to_vec();
    let prefix = match &salt {
        Some(salt) => {
            raw.extend_from_slice(salt);
            "{SSHA}"
        }
        None => "{SHA}",
    };
    format!("{}{}", prefix, base64::encode(&raw))
}

fn md5_digest(plaintext: &str, salt: Option<[u8; 4]>) -> String {
    let mut hasher = Md5::new();
    hasher.update(plaintext.as_bytes());
    if let Some(salt) = &salt {
        hasher.update(salt);
    }
    let digest = hasher.finalize();
    let mut raw = digest.to_vec();
    let prefix = match &salt {
        Some(salt) => {
            raw.extend_from_slice(salt);
            "{SMD5}"
        }
        None => "{MD5}",
    };
    format!("{}{}", prefix, base64::encode(&raw))
}

const SALT_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz1234567890./";

fn random_salt() -> [u8; 4] {
    let mut salt = [0u8; 4];
    fill_random(&mut salt);
    salt
}

fn fill_random(buf: &mut [u8]) {
    #[cfg(target_family = "unix")]
    {
        use std::io::Read as _;
        if let Ok(mut f) = std::fs::File::open("/dev/urandom") {
            let _ = f.read_exact(buf);
        }
    }
}

#[cfg(unix)]
fn crypt_raw(key: &str, salt: &str) -> Result<String, PasswordError> {
    use std::ffi::{CStr, CString};
    use std::os::raw::c_char;

    #[link(name = "crypt")]
    extern "C" {
        fn crypt(key: *const c_char, salt: *const c_char) -> *mut c_char;
    }

    let c_key =
        CString::new(key).map_err(|_| PasswordError("NUL byte in plaintext".into()))?;
    let c_salt =
        CString::new(salt).map_err(|_| PasswordError("NUL byte in salt".into()))?;

    unsafe {
        let result = crypt(c_key.as_ptr(), c_salt.as_ptr());
        if result.is_null() {
            return Err(PasswordError("crypt() returned null".into()));
        }
        Ok(CStr::from_ptr(result).to_string_lossy().into_owned())
    }
}

#[cfg(unix)]
fn crypt_des(key: &str) -> Result<String, PasswordError> {
    let mut raw = [0u8; 2];
    fill_random(&mut raw);
    let salt = format!(
        "{}{}",
        SALT_CHARS[(raw[0] & 63) as usize] as char,
        SALT_CHARS[(raw[1] & 63) as usize] as char
    );
    crypt_raw(key, &salt)
}

#[cfg(unix)]
fn crypt_md5(key: &str) -> Result<String, PasswordError> {
    let mut raw = [0u8; 8];
    fill_random(&mut raw);
    let mut salt = String::from("$1$");
    for &b in &raw {
        salt.push(SALT_CHARS[(b & 63) as usize] as char);
    }
    let hash = crypt_raw(key, &salt)?;
    if hash.len() < 25 {
        return Err(PasswordError("MD5 crypt not available".into()));
    }
    Ok(hash)
}

#[cfg(not(unix))]
fn crypt_des(_key: &str) -> Result<String, PasswordError> {
    Err(PasswordError("crypt not available on this platform".into()))
}

#[cfg(not(unix))]
fn crypt_md5(_key: &str) -> Result<String, PasswordError> {
    Err(PasswordError("crypt not available on this platform".into()))
}
