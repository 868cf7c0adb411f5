//! Certificate-parsing tests for the TLS probe's expiry/CN/SAN extraction
//! (`src/tls_utils.rs`, consumed by `probes::tls`).

use rcgen::{generate_simple_self_signed, CertificateParams};
use std::time::{Duration, SystemTime};

#[tokio::test]
async fn test_expired_certificate_detection() -> Result<(), Box<dyn std::error::Error>> {
	let mut params = CertificateParams::new(vec!["localhost".into()]);

	let now = SystemTime::now();
	let one_year_ago = now - Duration::from_secs(365 * 24 * 60 * 60);
	let yesterday = now - Duration::from_secs(24 * 60 * 60);

	params.not_before = one_year_ago.into();
	params.not_after = yesterday.into();

	let cert = rcgen::Certificate::from_params(params)?;
	let cert_pem = cert.serialize_pem()?;

	let tmpdir = tempfile::tempdir()?;
	let cert_path = tmpdir.path().join("expired_cert.pem");
	std::fs::write(&cert_path, cert_pem.as_bytes())?;

	let certs = oju_sentinel::tls_utils::load_certs(&cert_path)?;
	let is_expired = oju_sentinel::tls_utils::is_cert_expired(&certs[0])?;

	assert!(
		is_expired,
		"certificate with not_after in the past should be detected as expired"
	);

	Ok(())
}

#[tokio::test]
async fn test_valid_certificate_not_expired() -> Result<(), Box<dyn std::error::Error>> {
	let mut params = CertificateParams::new(vec!["localhost".into()]);

	let now = SystemTime::now();
	let one_year_from_now = now + Duration::from_secs(365 * 24 * 60 * 60);

	params.not_before = now.into();
	params.not_after = one_year_from_now.into();

	let cert = rcgen::Certificate::from_params(params)?;
	let cert_pem = cert.serialize_pem()?;

	let tmpdir = tempfile::tempdir()?;
	let cert_path = tmpdir.path().join("valid_cert.pem");
	std::fs::write(&cert_path, cert_pem.as_bytes())?;

	let certs = oju_sentinel::tls_utils::load_certs(&cert_path)?;
	let is_expired = oju_sentinel::tls_utils::is_cert_expired(&certs[0])?;

	assert!(
		!is_expired,
		"certificate with not_after in the future should not be detected as expired"
	);

	Ok(())
}

#[tokio::test]
async fn test_self_signed_certificate_detected() -> Result<(), Box<dyn std::error::Error>> {
	let cert = generate_simple_self_signed(vec!["self-signed.example.com".into()])?;
	let cert_pem = cert.serialize_pem()?;

	let tmpdir = tempfile::tempdir()?;
	let cert_path = tmpdir.path().join("self_signed_cert.pem");
	std::fs::write(&cert_path, cert_pem.as_bytes())?;

	let certs = oju_sentinel::tls_utils::load_certs(&cert_path)?;
	assert!(oju_sentinel::tls_utils::is_self_signed(&certs[0])?);

	Ok(())
}

#[tokio::test]
async fn test_certificate_common_name_extraction() -> Result<(), Box<dyn std::error::Error>> {
	let cert = generate_simple_self_signed(vec!["test.example.com".into()])?;
	let cert_pem = cert.serialize_pem()?;

	let tmpdir = tempfile::tempdir()?;
	let cert_path = tmpdir.path().join("cn_test_cert.pem");
	std::fs::write(&cert_path, cert_pem.as_bytes())?;

	let certs = oju_sentinel::tls_utils::load_certs(&cert_path)?;
	let cn = oju_sentinel::tls_utils::first_common_name(&certs[0])?;

	assert!(cn.is_some(), "certificate should have a common name");

	Ok(())
}

#[tokio::test]
async fn test_certificate_dns_names_extraction() -> Result<(), Box<dyn std::error::Error>> {
	let cert = generate_simple_self_signed(vec![
		"test.example.com".into(),
		"*.example.com".into(),
		"localhost".into(),
	])?;
	let cert_pem = cert.serialize_pem()?;

	let tmpdir = tempfile::tempdir()?;
	let cert_path = tmpdir.path().join("san_test_cert.pem");
	std::fs::write(&cert_path, cert_pem.as_bytes())?;

	let certs = oju_sentinel::tls_utils::load_certs(&cert_path)?;
	let dns_names = oju_sentinel::tls_utils::dns_names_from_cert(&certs[0])?;

	assert!(
		!dns_names.is_empty(),
		"certificate should have DNS names in SAN extension"
	);
	assert!(
		dns_names.contains(&"test.example.com".to_string()),
		"DNS names should include test.example.com"
	);

	Ok(())
}
