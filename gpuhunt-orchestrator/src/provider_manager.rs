use gpuhunt_providers::Marketplace;
use std::sync::Arc;

use crate::settings::{ProviderKind, Settings};

pub struct ProviderManager;

impl ProviderManager {
    pub fn get_provider(settings: &Settings) -> anyhow::Result<Arc<dyn Marketplace>> {
        match settings.provider {
            #[cfg(feature = "provider-vast")]
            ProviderKind::Vast => {
                let api_key = settings
                    .api_key
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("vast provider requires an API key"))?;
                let provider =
                    gpuhunt_providers::vast::VastProvider::new(&settings.api_base_url, api_key)?;
                Ok(Arc::new(provider))
            }
            // Dry run: an empty in-memory marketplace never yields offers.
            #[cfg(feature = "provider-mock")]
            ProviderKind::Mock => Ok(Arc::new(gpuhunt_providers::mock::MockMarketplace::new())),
            #[allow(unreachable_patterns)]
            other => Err(anyhow::anyhow!(
                "provider `{}` is not compiled in (enable feature provider-{})",
                other.as_str(),
                other.as_str()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "provider-mock")]
    #[test]
    fn builds_mock_provider() {
        let settings = Settings {
            provider: ProviderKind::Mock,
            ..Settings::default()
        };
        let p = ProviderManager::get_provider(&settings).unwrap();
        assert_eq!(p.code(), "mock");
    }

    #[cfg(feature = "provider-vast")]
    #[test]
    fn vast_needs_key() {
        let settings = Settings::default();
        assert!(ProviderManager::get_provider(&settings).is_err());

        let settings = Settings {
            api_key: Some("k".to_string()),
            ..Settings::default()
        };
        assert_eq!(ProviderManager::get_provider(&settings).unwrap().code(), "vast");
    }
}
