use std::{fmt, future::Future};

use async_trait::async_trait;
use hmac::{digest::KeyInit, Hmac, Mac};
use sha2::Sha256;
use zumq_error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Проверка подписи подписки.
///
/// Возвращает `Ok(())`, если подписчику разрешено получать канал.
/// Любая ошибка означает отказ.
#[async_trait]
pub trait SignatureChecker: Send + Sync {
    async fn check(
        &self,
        channel_name: &str,
        signature: &str,
    ) -> Result<(), AuthError>;
}

/// Проверка на основе замыкания.
pub struct FnChecker<F> {
    f: F,
}

/// Подпись = hex(HMAC-SHA256(secret, channel_name)) в нижнем регистре.
#[derive(Clone)]
pub struct HmacSignatureChecker {
    mac: HmacSha256,
}

/// Разрешает всё.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

/// Запрещает всё.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<F, Fut> FnChecker<F>
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AuthError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl HmacSignatureChecker {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, AuthError> {
        let mac = <HmacSha256 as KeyInit>::new_from_slice(secret.as_ref()).map_err(|e| {
            AuthError::Checker {
                reason: format!("invalid HMAC key: {e}"),
            }
        })?;
        Ok(Self { mac })
    }

    /// Подписывает канал.
    pub fn sign(
        &self,
        channel_name: &str,
    ) -> String {
        let mut mac = self.mac.clone();
        mac.update(channel_name.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Проверяет подпись за постоянное время.
    pub fn verify(
        &self,
        channel_name: &str,
        signature: &str,
    ) -> Result<(), AuthError> {
        let invalid = || AuthError::InvalidSignature {
            channel: channel_name.to_string(),
        };
        let expected = hex::decode(signature).map_err(|_| invalid())?;

        let mut mac = self.mac.clone();
        mac.update(channel_name.as_bytes());
        mac.verify_slice(&expected).map_err(|_| invalid())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl<F, Fut> SignatureChecker for FnChecker<F>
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AuthError>> + Send + 'static,
{
    async fn check(
        &self,
        channel_name: &str,
        signature: &str,
    ) -> Result<(), AuthError> {
        (self.f)(channel_name.to_string(), signature.to_string()).await
    }
}

#[async_trait]
impl SignatureChecker for HmacSignatureChecker {
    async fn check(
        &self,
        channel_name: &str,
        signature: &str,
    ) -> Result<(), AuthError> {
        self.verify(channel_name, signature)
    }
}

#[async_trait]
impl SignatureChecker for AllowAll {
    async fn check(
        &self,
        _channel_name: &str,
        _signature: &str,
    ) -> Result<(), AuthError> {
        Ok(())
    }
}

#[async_trait]
impl SignatureChecker for DenyAll {
    async fn check(
        &self,
        channel_name: &str,
        _signature: &str,
    ) -> Result<(), AuthError> {
        Err(AuthError::Rejected {
            channel: channel_name.to_string(),
            reason: "all subscriptions are denied".to_string(),
        })
    }
}

impl<F> fmt::Debug for FnChecker<F> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("FnChecker")
    }
}

impl fmt::Debug for HmacSignatureChecker {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        // Ключ в логи не попадает.
        f.write_str("HmacSignatureChecker { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что подпись, выданная `sign`, проходит проверку.
    #[tokio::test]
    async fn test_hmac_accepts_own_signature() {
        let checker = HmacSignatureChecker::new("secret").unwrap();
        let signature = checker.sign("orders");

        assert_eq!(signature.len(), 64);
        assert!(checker.check("orders", &signature).await.is_ok());
    }

    /// Тест проверяет отказ для чужого канала, чужого ключа и мусора.
    #[tokio::test]
    async fn test_hmac_rejects_bad_signatures() {
        let checker = HmacSignatureChecker::new("secret").unwrap();
        let other = HmacSignatureChecker::new("other").unwrap();
        let signature = checker.sign("orders");

        assert!(matches!(
            checker.check("payments", &signature).await,
            Err(AuthError::InvalidSignature { channel }) if channel == "payments"
        ));
        assert!(other.check("orders", &signature).await.is_err());
        assert!(checker.check("orders", "zz-not-hex").await.is_err());
        assert!(checker.check("orders", "").await.is_err());
    }

    /// Тест проверяет известный вектор HMAC-SHA256 (RFC 4231, случай 2).
    #[test]
    fn test_hmac_known_vector() {
        let checker = HmacSignatureChecker::new("Jefe").unwrap();
        assert_eq!(
            checker.sign("what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[tokio::test]
    async fn test_fn_checker_passes_arguments() {
        let checker = FnChecker::new(|channel: String, signature: String| async move {
            if signature == format!("signed:{channel}") {
                Ok(())
            } else {
                Err(AuthError::Checker {
                    reason: "mismatch".into(),
                })
            }
        });

        assert!(checker.check("a", "signed:a").await.is_ok());
        assert!(checker.check("a", "signed:b").await.is_err());
    }

    #[tokio::test]
    async fn test_trivial_checkers() {
        assert!(AllowAll.check("x", "").await.is_ok());
        assert!(DenyAll.check("x", "").await.is_err());
    }
}
