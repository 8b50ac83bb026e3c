use crate::services::{ensure, ForumContext, ForumError, ServiceResult, SessionCheckMode};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Request variable carrying the anti-forgery token.
pub const SESSION_TOKEN_VAR: &str = "session_token";

fn session_mac(secret: &str, session_id: &str) -> ServiceResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| ForumError::Internal(format!("session key rejected: {err}")))?;
    mac.update(b"session ");
    mac.update(session_id.as_bytes());
    Ok(mac)
}

pub fn create_session_token(secret: &str, session_id: &str) -> ServiceResult<String> {
    let mac = session_mac(secret, session_id)?;
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Checks the submitted token against the one derived from the session id.
/// Nothing may be mutated when this fails.
pub fn verify_session_token(
    ctx: &ForumContext,
    secret: &str,
    mode: SessionCheckMode,
) -> ServiceResult<()> {
    let session_id = ctx
        .session
        .string("session_id")
        .ok_or(ForumError::SessionTimeout)?;
    let provided = match mode {
        SessionCheckMode::Get => ctx.request.string(SESSION_TOKEN_VAR),
        SessionCheckMode::Post => ctx.post_vars.string(SESSION_TOKEN_VAR),
        SessionCheckMode::Request => ctx
            .post_vars
            .string(SESSION_TOKEN_VAR)
            .or_else(|| ctx.request.string(SESSION_TOKEN_VAR)),
    }
    .ok_or(ForumError::InvalidSession)?;
    let raw = URL_SAFE_NO_PAD
        .decode(provided.as_bytes())
        .map_err(|_| ForumError::InvalidSession)?;
    session_mac(secret, &session_id)?
        .verify_slice(&raw)
        .map_err(|_| ForumError::InvalidSession)
}

pub fn is_not_guest(ctx: &ForumContext) -> ServiceResult<()> {
    ensure(
        !ctx.user_info.is_guest,
        ForumError::PermissionDenied("not_guest".into()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_session(session_id: &str) -> ForumContext {
        let mut ctx = ForumContext::default();
        ctx.session.set("session_id", session_id);
        ctx
    }

    #[test]
    fn matching_token_passes() {
        let mut ctx = ctx_with_session("abc123");
        let token = create_session_token("secret", "abc123").unwrap();
        ctx.request.set(SESSION_TOKEN_VAR, token);
        verify_session_token(&ctx, "secret", SessionCheckMode::Request).unwrap();
    }

    #[test]
    fn token_for_other_session_is_rejected() {
        let mut ctx = ctx_with_session("abc123");
        let token = create_session_token("secret", "other").unwrap();
        ctx.post_vars.set(SESSION_TOKEN_VAR, token);
        let result = verify_session_token(&ctx, "secret", SessionCheckMode::Post);
        assert!(matches!(result, Err(ForumError::InvalidSession)));
    }

    #[test]
    fn get_mode_ignores_post_body() {
        let mut ctx = ctx_with_session("abc123");
        let token = create_session_token("secret", "abc123").unwrap();
        ctx.post_vars.set(SESSION_TOKEN_VAR, token);
        let result = verify_session_token(&ctx, "secret", SessionCheckMode::Get);
        assert!(matches!(result, Err(ForumError::InvalidSession)));
    }

    #[test]
    fn missing_session_times_out() {
        let ctx = ForumContext::default();
        let result = verify_session_token(&ctx, "secret", SessionCheckMode::Request);
        assert!(matches!(result, Err(ForumError::SessionTimeout)));
    }

    #[test]
    fn guests_are_rejected() {
        let ctx = ForumContext::default();
        assert!(is_not_guest(&ctx).is_err());
    }
}
