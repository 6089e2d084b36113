//! Static geography: country routing boxes, institutional recipients,
//! named query regions
//!
//! The recipient registry is deliberately immutable configuration, built
//! once on first use. Hot reload is not supported; redeploy to change
//! routing.

use std::sync::OnceLock;

use crate::config::defaults;
use crate::geo::BoundingBox;
use crate::types::{ChannelKind, GeoPoint, Recipient};

/// One routed destination: a country (or the regional catch-all) with its
/// bounding box and ordered institutional recipient list.
#[derive(Debug, Clone)]
pub struct CountryRoute {
    pub country: String,
    pub bbox: BoundingBox,
    pub recipients: Vec<Recipient>,
}

/// Routing registry: per-country boxes plus the basin-wide regional route
#[derive(Debug)]
pub struct RecipientRegistry {
    countries: Vec<CountryRoute>,
    regional: CountryRoute,
}

impl RecipientRegistry {
    /// Resolve the affected routes for a hazard location.
    ///
    /// Every matching country is included; the regional route is appended
    /// for any point inside the basin catch-all box. A point outside all
    /// country boxes and outside the basin yields an empty set (and
    /// therefore no alert).
    pub fn route(&self, location: GeoPoint) -> Vec<&CountryRoute> {
        let mut routes: Vec<&CountryRoute> = self
            .countries
            .iter()
            .filter(|c| c.bbox.contains(location))
            .collect();
        if self.regional.bbox.contains(location) {
            routes.push(&self.regional);
        }
        routes
    }

    /// Look up a single route by country name (case-insensitive).
    /// Used by the dry-run CLI fanout.
    pub fn by_country(&self, name: &str) -> Option<&CountryRoute> {
        let lower = name.to_ascii_lowercase();
        self.countries
            .iter()
            .chain(std::iter::once(&self.regional))
            .find(|c| c.country.to_ascii_lowercase() == lower)
    }

    pub fn regional(&self) -> &CountryRoute {
        &self.regional
    }
}

fn email(name: &str, address: &str, priority: u8) -> Recipient {
    Recipient {
        name: name.to_string(),
        address: address.to_string(),
        channel: ChannelKind::Email,
        priority,
    }
}

fn sms(name: &str, number: &str, priority: u8) -> Recipient {
    Recipient {
        name: name.to_string(),
        address: number.to_string(),
        channel: ChannelKind::Sms,
        priority,
    }
}

fn webhook(name: &str, url: &str, priority: u8) -> Recipient {
    Recipient {
        name: name.to_string(),
        address: url.to_string(),
        channel: ChannelKind::Webhook,
        priority,
    }
}

/// The recipient registry, built once
pub fn registry() -> &'static RecipientRegistry {
    static REGISTRY: OnceLock<RecipientRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| RecipientRegistry {
        countries: vec![
            CountryRoute {
                country: "Mozambique".to_string(),
                bbox: BoundingBox::new(-27.0, -10.0, 30.0, 41.0),
                recipients: vec![
                    email("INAM Forecasting Desk", "previsao@inam.gov.mz", 1),
                    email("INGC Emergency Operations (CENOE)", "cenoe@ingc.gov.mz", 1),
                    email("WHO Mozambique Country Office", "afwcomoz@who.int", 2),
                    sms("INGC Duty Officer", "+258821000145", 2),
                ],
            },
            CountryRoute {
                country: "Madagascar".to_string(),
                bbox: BoundingBox::new(-26.0, -11.0, 43.0, 51.0),
                recipients: vec![
                    email("Meteo Madagascar Cyclone Desk", "previsions@meteomadagascar.mg", 1),
                    email("BNGRC Operations Centre", "operations@bngrc.mg", 1),
                    email("WHO Madagascar Country Office", "afwcomdg@who.int", 2),
                ],
            },
            CountryRoute {
                country: "Malawi".to_string(),
                bbox: BoundingBox::new(-17.0, -9.0, 33.0, 36.0),
                recipients: vec![
                    email("DCCMS Duty Forecaster", "metdept@metmalawi.gov.mw", 1),
                    email("DoDMA Response Unit", "response@dodma.gov.mw", 2),
                ],
            },
            CountryRoute {
                country: "Zimbabwe".to_string(),
                bbox: BoundingBox::new(-22.0, -15.0, 25.0, 33.0),
                recipients: vec![
                    email("MSD Forecasting Office", "forecasting@weatherzw.org.zw", 1),
                    email("Civil Protection Unit", "cpu@moha.gov.zw", 2),
                ],
            },
        ],
        regional: CountryRoute {
            country: "Regional".to_string(),
            bbox: BoundingBox::new(
                defaults::REGIONAL_SOUTH,
                defaults::REGIONAL_NORTH,
                defaults::REGIONAL_WEST,
                defaults::REGIONAL_EAST,
            ),
            recipients: vec![
                email("RSMC La Reunion Liaison", "rsmc-lareunion@meteo.fr", 1),
                email("WHO AFRO Emergency Hub", "afrooutbreak@who.int", 1),
                webhook(
                    "SADC Humanitarian Coordination",
                    "https://dmc.sadc.int/hooks/hazard-feed",
                    2,
                ),
            ],
        },
    })
}

/// Named regions for the `/hazards/by-region/{region}` filter
pub fn query_region(name: &str) -> Option<BoundingBox> {
    match name.to_ascii_lowercase().as_str() {
        "mozambique" => Some(BoundingBox::new(-27.0, -10.0, 30.0, 41.0)),
        "madagascar" => Some(BoundingBox::new(-26.0, -11.0, 43.0, 51.0)),
        "malawi" => Some(BoundingBox::new(-17.0, -9.0, 33.0, 36.0)),
        "zimbabwe" => Some(BoundingBox::new(-22.0, -15.0, 25.0, 33.0)),
        _ => None,
    }
}
