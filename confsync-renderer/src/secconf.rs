//! Base64 + OpenPGP decoding for encrypted backend values.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pgp::composed::{Deserializable, Message, SignedSecretKey};

use crate::error::RenderError;

/// Decode a base64-encoded OpenPGP message with `private_key`.
///
/// The key may be ASCII-armored or binary; the key is assumed to carry no
/// passphrase.
pub fn decode(data: &[u8], private_key: &[u8]) -> Result<Vec<u8>, RenderError> {
    let ciphertext = STANDARD
        .decode(data)
        .map_err(|err| RenderError::Decrypt(format!("invalid base64: {err}")))?;

    let key = match SignedSecretKey::from_armor_single(Cursor::new(private_key)) {
        Ok((key, _headers)) => key,
        Err(_) => SignedSecretKey::from_bytes(Cursor::new(private_key))
            .map_err(|err| RenderError::Decrypt(format!("invalid private key: {err}")))?,
    };

    let message = Message::from_bytes(Cursor::new(ciphertext))
        .map_err(|err| RenderError::Decrypt(format!("invalid message: {err}")))?;
    let (decrypted, _key_ids) = message
        .decrypt(String::new, &[&key])
        .map_err(|err| RenderError::Decrypt(format!("cannot decrypt value: {err}")))?;
    let message = decrypted
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::Decrypt("message has no literal content".to_string()))?
        .map_err(|err| RenderError::Decrypt(format!("cannot decrypt value: {err}")))?;
    message
        .get_content()
        .map_err(|err| RenderError::Decrypt(format!("cannot read message content: {err}")))?
        .ok_or_else(|| RenderError::Decrypt("message has no literal content".to_string()))
}
