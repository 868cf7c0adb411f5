use anyhow::{Context, Result};
use rustls_pemfile::certs as pem_certs;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tokio_rustls::rustls::Certificate;

/// Load PEM-encoded certificates from `path` and return them as `rustls::Certificate`.
pub fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
	let f = File::open(path).with_context(|| format!("opening cert file {}", path.display()))?;
	let mut reader = BufReader::new(f);
	let raw =
		pem_certs(&mut reader).map_err(|e| anyhow::anyhow!("failed to parse PEM certs: {}", e))?;
	if raw.is_empty() {
		anyhow::bail!("no certificates found in {}", path.display());
	}
	Ok(raw.into_iter().map(Certificate).collect())
}

/// Parse the DER-encoded certificate bytes and return the x509 parser's `X509Certificate`.
pub fn parse_first_cert_x509<'a>(
	cert: &'a Certificate,
) -> Result<x509_parser::certificate::X509Certificate<'a>> {
	let res = x509_parser::parse_x509_certificate(&cert.0)
		.map_err(|e| anyhow::anyhow!("failed to parse x509 certificate: {:?}", e))?;
	Ok(res.1)
}

/// Return true if the certificate appears to be self-signed (subject == issuer).
pub fn is_self_signed(cert: &Certificate) -> Result<bool> {
	let parsed = parse_first_cert_x509(cert)?;
	Ok(parsed.tbs_certificate.subject == parsed.tbs_certificate.issuer)
}

/// Extract DNS names from the SubjectAlternativeName extension, if present.
pub fn dns_names_from_cert(cert: &Certificate) -> Result<Vec<String>> {
	let parsed = parse_first_cert_x509(cert)?;

	let mut out: Vec<String> = Vec::new();

	use x509_parser::extensions::GeneralName;
	use x509_parser::extensions::ParsedExtension;

	for ext in parsed.extensions().iter() {
		match ext.parsed_extension() {
			ParsedExtension::SubjectAlternativeName(san) => {
				for name in san.general_names.iter() {
					if let GeneralName::DNSName(d) = name {
						out.push(d.to_string());
					}
				}
			}
			_ => {}
		}
	}

	Ok(out)
}

/// Return the first Common Name (CN) from the subject, if present.
pub fn first_common_name(cert: &Certificate) -> Result<Option<String>> {
	let parsed = parse_first_cert_x509(cert)?;

	// The subject is an RDNSequence: iterate to find attributes with OID for CN
	for cn in parsed.subject().iter_common_name() {
		if let Ok(s) = cn.as_str() {
			return Ok(Some(s.to_string()));
		}
	}

	Ok(None)
}

/// Return true if the certificate is expired at the current UTC time.
pub fn is_cert_expired(cert: &Certificate) -> Result<bool> {
	let parsed = parse_first_cert_x509(cert)?;

	let not_after = parsed.validity().not_after.to_datetime();
	let now = x509_parser::time::ASN1Time::now().to_datetime();

	Ok(not_after <= now)
}

/// Return true if the certificate's validity period hasn't started yet
/// (now < notBefore).
pub fn is_cert_not_yet_valid(cert: &Certificate) -> Result<bool> {
	let parsed = parse_first_cert_x509(cert)?;

	let not_before = parsed.validity().not_before.to_datetime();
	let now = x509_parser::time::ASN1Time::now().to_datetime();

	Ok(now < not_before)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn load_certs_missing_path_returns_err() {
		let p = Path::new("/this/path/does/not/exist/cert.pem");
		assert!(load_certs(p).is_err());
	}
}
