//! Tests for identity-token verification

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::jwk_cache::{JwkCacheConfig, JwkSet, KeySetFetcher};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const JWKS: &str = include_str!("../tests/fixtures/jwks.json");
    const SIGNING_KEY: &[u8] = include_bytes!("../tests/fixtures/rsa_2048.pem");
    const ROTATED_KEY: &[u8] = include_bytes!("../tests/fixtures/rsa_2048_rotated.pem");
    const KID: &str = "test-key-2048";
    const AUDIENCE: &str = "/projects/42/global/backendServices/7";

    struct FixedFetcher(Option<JwkSet>);

    #[async_trait]
    impl KeySetFetcher for FixedFetcher {
        async fn fetch(&self) -> Result<JwkSet, JwkError> {
            self.0
                .clone()
                .ok_or_else(|| JwkError::Fetch("connection refused".to_string()))
        }
    }

    fn verifier_with(set: Option<JwkSet>) -> JwtVerifier {
        let cache = JwkCache::new(Arc::new(FixedFetcher(set)), JwkCacheConfig::default());
        JwtVerifier::new(Arc::new(cache)).with_audience(AUDIENCE)
    }

    fn verifier() -> JwtVerifier {
        verifier_with(Some(serde_json::from_str(JWKS).unwrap()))
    }

    fn claims() -> IapClaims {
        let now = Utc::now().timestamp();
        IapClaims {
            email: "alice@example.com".to_string(),
            iss: IAP_ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            sub: "accounts.google.com:1234".to_string(),
            iat: now - 30,
            exp: now + 600,
        }
    }

    fn sign_with(claims: &IapClaims, pem: &[u8], kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
    }

    fn sign(claims: &IapClaims) -> String {
        sign_with(claims, SIGNING_KEY, Some(KID))
    }

    fn b64(value: &str) -> String {
        URL_SAFE_NO_PAD.encode(value)
    }

    #[tokio::test]
    async fn test_valid_token() {
        let verified = verifier().verify(&sign(&claims())).await.unwrap();
        assert_eq!(verified.email, "alice@example.com");
        assert_eq!(verified.aud, AUDIENCE);
    }

    #[tokio::test]
    async fn test_expired_checked_before_signature() {
        let mut expired = claims();
        expired.exp = Utc::now().timestamp() - 10;
        let token = sign_with(&expired, ROTATED_KEY, Some(KID));

        assert_matches!(verifier().verify(&token).await, Err(JwtError::Expired));
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let c = claims();
        let token = sign(&c);
        assert!(verifier().verify_at(&token, c.exp).await.is_ok());
        assert_matches!(
            verifier().verify_at(&token, c.exp + 1).await,
            Err(JwtError::Expired)
        );
    }

    #[tokio::test]
    async fn test_not_yet_valid() {
        let c = claims();
        let token = sign(&c);
        assert_matches!(
            verifier().verify_at(&token, c.iat - 1).await,
            Err(JwtError::NotYetValid)
        );
    }

    #[tokio::test]
    async fn test_untrusted_issuer() {
        let mut c = claims();
        c.iss = "https://evil.example.com".to_string();
        assert_matches!(
            verifier().verify(&sign(&c)).await,
            Err(JwtError::UntrustedIssuer(iss)) if iss == "https://evil.example.com"
        );
    }

    #[tokio::test]
    async fn test_audience_mismatch_and_unset_audience() {
        let mut c = claims();
        c.aud = "/projects/other".to_string();
        let token = sign(&c);

        assert_matches!(
            verifier().verify(&token).await,
            Err(JwtError::AudienceMismatch)
        );

        let cache = JwkCache::new(
            Arc::new(FixedFetcher(Some(serde_json::from_str(JWKS).unwrap()))),
            JwkCacheConfig::default(),
        );
        let any_audience = JwtVerifier::new(Arc::new(cache));
        assert!(any_audience.audience().is_none());
        assert!(any_audience.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let token = sign(&claims());
        let parts: Vec<&str> = token.split('.').collect();

        let mut forged = claims();
        forged.email = "admin@example.com".to_string();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_matches!(
            verifier().verify(&tampered).await,
            Err(JwtError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_wrong_key_for_kid_rejected() {
        let token = sign_with(&claims(), ROTATED_KEY, Some(KID));
        assert_matches!(
            verifier().verify(&token).await,
            Err(JwtError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_unknown_and_missing_kid() {
        let unknown = sign_with(&claims(), SIGNING_KEY, Some("nope"));
        assert_matches!(
            verifier().verify(&unknown).await,
            Err(JwtError::Key(JwkError::KeyNotFound(_)))
        );

        let missing = sign_with(&claims(), SIGNING_KEY, None);
        assert_matches!(verifier().verify(&missing).await, Err(JwtError::MissingKeyId));
    }

    #[tokio::test]
    async fn test_weak_key_kid_rejected() {
        let token = sign_with(&claims(), SIGNING_KEY, Some("weak-key-1024"));
        assert_matches!(
            verifier().verify(&token).await,
            Err(JwtError::Key(JwkError::KeyNotFound(_)))
        );
    }

    #[tokio::test]
    async fn test_non_rs256_algorithms_rejected() {
        let payload = b64(&serde_json::to_string(&claims()).unwrap());
        for alg in ["HS256", "none", "ES256"] {
            let header = b64(&format!(r#"{{"alg":"{alg}","kid":"{KID}"}}"#));
            let token = format!("{header}.{payload}.c2ln");
            assert_matches!(
                verifier().verify(&token).await,
                Err(JwtError::UnsupportedAlgorithm(a)) if a == alg
            );
        }
    }

    #[tokio::test]
    async fn test_structural_errors() {
        let v = verifier();
        for token in ["", "a.b", "a.b.c.d", "a..c", "..", "header.payload."] {
            assert_matches!(v.verify(token).await, Err(JwtError::Malformed(_)), "{token:?}");
        }
        assert_matches!(
            v.verify("!!!.e30.c2ln").await,
            Err(JwtError::Malformed(msg)) if msg.contains("header")
        );
    }

    #[cfg(not(feature = "insecure-dev-override"))]
    #[tokio::test]
    async fn test_key_outage_fails_closed() {
        let token = sign(&claims());
        let err = verifier_with(None)
            .with_unverified_fallback(true)
            .verify(&token)
            .await
            .unwrap_err();

        assert!(err.is_key_unavailable());
        assert_matches!(err, JwtError::Key(JwkError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_outage_without_fallback_still_checks_claims() {
        let mut c = claims();
        c.exp = Utc::now().timestamp() - 1;
        assert_matches!(
            verifier_with(None).verify(&sign(&c)).await,
            Err(JwtError::Expired)
        );
    }

    #[test]
    fn test_claims_wire_names() {
        let json = serde_json::to_value(claims()).unwrap();
        for field in ["email", "iss", "aud", "sub", "iat", "exp"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }
}
