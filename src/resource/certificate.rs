//! Certificate - ACM certificate validated through DNS

use declarative::{Construct, Error, Expr, Resource, Result, Stack};

pub const CERTIFICATE: &str = "AWS::CertificateManager::Certificate";

/// A public certificate for one domain, validated through DNS records
#[derive(Debug, Clone)]
pub struct Certificate {
    pub id: String,
    pub domain_name: String,
}

#[derive(Debug, Clone)]
pub struct CertificateHandle {
    pub logical_id: String,
}

impl CertificateHandle {
    /// `Ref` of a certificate resolves to its ARN
    pub fn arn(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }
}

/// A wildcard may appear once, as the leading label
pub fn validate_domain(domain: &str) -> std::result::Result<(), String> {
    let stars = domain.matches('*').count();
    if stars == 0 {
        return Ok(());
    }
    if stars > 1 {
        return Err(format!("{domain:?} contains more than one wildcard"));
    }
    if !domain.starts_with("*.") {
        return Err(format!("wildcard in {domain:?} must be the leading label"));
    }
    Ok(())
}

impl Construct for Certificate {
    type Handle = CertificateHandle;

    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Certificate {} for {:?}", self.id, self.domain_name)
    }

    fn declare(&self, stack: &mut Stack) -> Result<CertificateHandle> {
        validate_domain(&self.domain_name)
            .map_err(|reason| Error::invalid_property(&self.id, reason))?;

        let logical_id = stack.add(
            Resource::new(&self.id, CERTIFICATE)
                .property("DomainName", self.domain_name.as_str())
                .property("ValidationMethod", "DNS"),
        )?;
        Ok(CertificateHandle { logical_id })
    }
}
