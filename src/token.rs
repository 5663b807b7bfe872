use ring::hmac;
use std::sync::Arc;
use thiserror::Error;

use crate::models::UserState;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("session token has no signature")]
    Unsigned,

    #[error("session token is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("session token signature does not match")]
    Signature,

    #[error("session token payload is unreadable: {0}")]
    Payload(#[from] bincode::Error),
}

fn encode(bytes: &[u8]) -> String {
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

fn decode(text: &str) -> Result<Vec<u8>, TokenError> {
    Ok(base64::decode_config(text, base64::URL_SAFE_NO_PAD)?)
}

/// Seals a `UserState` as `payload.tag`, the bincode payload and its
/// HMAC-SHA256 tag, both base64url. Clients carry the token between requests
/// and can read it but not alter it.
#[derive(Clone, Debug)]
pub struct TokenSigner {
    key: Arc<hmac::Key>,
}

impl TokenSigner {
    pub fn new(key: hmac::Key) -> TokenSigner {
        TokenSigner { key: Arc::new(key) }
    }

    pub fn seal(&self, user_state: &UserState) -> Result<String, TokenError> {
        let payload = bincode::serialize(user_state)?;
        let tag = hmac::sign(&self.key, &payload);

        Ok(format!("{}.{}", encode(&payload), encode(tag.as_ref())))
    }

    pub fn open(&self, token: &str) -> Result<UserState, TokenError> {
        let at = token.find('.').ok_or(TokenError::Unsigned)?;
        let payload = decode(&token[..at])?;
        let tag = decode(&token[at + 1..])?;

        hmac::verify(&self.key, &payload, &tag).map_err(|_err| TokenError::Signature)?;

        Ok(bincode::deserialize(&payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use crate::session::SessionState;
    use assert_matches::assert_matches;

    fn signer(key: &[u8]) -> TokenSigner {
        TokenSigner::new(hmac::Key::new(hmac::HMAC_SHA256, key))
    }

    fn user() -> UserState {
        let mut user = UserState {
            id: UserId([7; 16]),
            quizzes: Default::default(),
        };
        user.quizzes.insert(
            "recycling".into(),
            SessionState {
                current_index: 1,
                selected: Some(2),
                revealed: true,
                score: 1,
                completed: false,
            },
        );
        user
    }

    #[test]
    fn opens_what_it_sealed() {
        let signer = signer(b"key");
        let token = signer.seal(&user()).unwrap();

        assert_eq!(signer.open(&token).unwrap(), user());
    }

    #[test]
    fn rejects_other_keys() {
        let token = signer(b"other key").seal(&user()).unwrap();

        assert_matches!(signer(b"key").open(&token), Err(TokenError::Signature));
    }

    #[test]
    fn rejects_swapped_payload() {
        let signer = signer(b"key");
        let token = signer.seal(&user()).unwrap();
        let tag = &token[token.find('.').unwrap()..];

        let mut forged = user();
        forged.quizzes.clear();
        let forged_payload = encode(&bincode::serialize(&forged).unwrap());

        assert_matches!(
            signer.open(&format!("{}{}", forged_payload, tag)),
            Err(TokenError::Signature)
        );
    }

    #[test]
    fn rejects_malformed_tokens() {
        let signer = signer(b"key");

        assert_matches!(signer.open("no-separator"), Err(TokenError::Unsigned));
        assert_matches!(signer.open("!!!.???"), Err(TokenError::Encoding(_)));
    }
}
