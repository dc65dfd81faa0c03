//! 连接鉴权：校验外部登录服务签发的 HS256 JWT
//!
//! token 取自查询参数 `?token=` 或 `Authorization: Bearer`；
//! 校验失败时在协议升级之前拒绝，不创建任何连接状态。

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::core::AuthError;

/// token 中约定的声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// 用户 ID
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: String,
    /// buyer / seller / admin
    #[serde(default)]
    pub role: String,
    pub exp: u64,
}

/// HS256 校验器
#[derive(Clone)]
pub struct JwtValidator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.trim().is_empty() {
            return Err(AuthError::Misconfigured("jwt secret is empty".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Ok(Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// 校验 token 并取出声明；sub 与 role 必须非空
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        if claims.role.is_empty() {
            return Err(AuthError::MissingRole);
        }
        Ok(claims)
    }

    /// 签发 token（本地调试与测试用，线上由登录服务签发）
    pub fn issue(&self, sub: &str, email: &str, role: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::Misconfigured(format!("system time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: sub.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            exp: now + ttl.as_secs(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(format!("failed to sign token: {}", e)))
    }
}

/// 取 token：查询参数优先，其次 Authorization 头
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(t) = query_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(t.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}
