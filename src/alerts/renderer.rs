//! Message rendering behind a swappable interface
//!
//! The built-in renderer produces English plain + HTML pairs. Additional
//! locales (including the indigenous-language templates maintained by the
//! language team) plug in as further `MessageRenderer` implementations
//! without touching the dispatch path.

use std::collections::BTreeMap;

use crate::types::{Hazard, RenderedMessage};

/// Renders the message variants for one hazard alert.
///
/// `pixel_url` is the fully resolved tracking-pixel URL; every HTML body
/// must embed it so opens can be recorded.
pub trait MessageRenderer: Send + Sync {
    fn render(
        &self,
        hazard: &Hazard,
        country: &str,
        pixel_url: &str,
    ) -> BTreeMap<String, RenderedMessage>;
}

/// Built-in English templates
pub struct EnglishTemplateRenderer;

impl EnglishTemplateRenderer {
    fn subject(hazard: &Hazard, country: &str) -> String {
        match hazard {
            Hazard::Cyclone(c) => format!(
                "CYCLONE ALERT ({}) - {} approaching {}",
                c.threat_level,
                c.name.as_deref().unwrap_or("tropical system"),
                country
            ),
            Hazard::Flood(f) => format!(
                "FLOOD ALERT ({}) - {:.0} km2 flooded in {}",
                f.severity, f.area_km2, country
            ),
            Hazard::Landslide(l) => {
                format!("LANDSLIDE RISK ({}) - {}", l.risk_level, country)
            }
            Hazard::Convergence(v) => format!(
                "CRITICAL CONVERGENCE - {} outbreak near cyclone path in {}",
                v.outbreak.disease, country
            ),
        }
    }

    fn plain_body(hazard: &Hazard, country: &str) -> String {
        match hazard {
            Hazard::Cyclone(c) => format!(
                "A tropical cyclone is threatening {country}.\n\
                 \n\
                 Position: {loc}\n\
                 Threat level: {threat}\n\
                 Max wind: {wind:.0} kt\n\
                 Central pressure: {pressure:.0} hPa\n\
                 \n\
                 ACTIONS:\n\
                 1. Move to higher ground away from the coast\n\
                 2. Secure loose items and store water and food\n\
                 3. Listen to local radio for official instructions\n",
                country = country,
                loc = c.location,
                threat = c.threat_level,
                wind = c.max_wind_kt.unwrap_or(0.0),
                pressure = c.min_pressure_hpa.unwrap_or(1013.0),
            ),
            Hazard::Flood(f) => format!(
                "Satellite analysis shows active flooding in {country}.\n\
                 \n\
                 Centre: {loc}\n\
                 Flooded area: {area:.1} km2\n\
                 Severity: {severity}\n\
                 \n\
                 ACTIONS:\n\
                 1. Avoid flooded roads and bridges\n\
                 2. Boil or treat drinking water\n\
                 3. Report trapped persons to emergency services\n",
                country = country,
                loc = f.location,
                area = f.area_km2,
                severity = f.severity,
            ),
            Hazard::Landslide(l) => format!(
                "Elevated landslide risk in {country}.\n\
                 \n\
                 Location: {loc}\n\
                 Risk level: {level} (score {score:.2})\n\
                 Cause: {reason}\n\
                 \n\
                 RECOMMENDED: {action}\n",
                country = country,
                loc = l.location,
                level = l.risk_level,
                score = l.risk_score,
                reason = l.reason,
                action = l.recommended_action,
            ),
            Hazard::Convergence(v) => format!(
                "A cyclone and a disease outbreak are converging in {country}.\n\
                 \n\
                 Outbreak: {disease}, {cases} cases ({severity})\n\
                 Cyclone threat: {threat}\n\
                 Separation: {distance:.0} km\n\
                 Risk score: {risk:.2}/1.0\n\
                 \n\
                 Flooding can contaminate water and displacement can spread\n\
                 infection. Pre-position medical supplies and prepare\n\
                 evacuation routes now.\n",
                country = country,
                disease = v.outbreak.disease,
                cases = v.outbreak.cases,
                severity = v.outbreak.severity,
                threat = v.cyclone.threat_level,
                distance = v.distance_km,
                risk = v.risk_score,
            ),
        }
    }

    fn html_body(plain: &str, pixel_url: &str) -> String {
        let escaped = plain
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        format!(
            "<html><body>\n<pre style=\"font-family:sans-serif\">{}</pre>\n\
             <img src=\"{}\" width=\"1\" height=\"1\" alt=\"\"/>\n</body></html>",
            escaped, pixel_url
        )
    }
}

impl MessageRenderer for EnglishTemplateRenderer {
    fn render(
        &self,
        hazard: &Hazard,
        country: &str,
        pixel_url: &str,
    ) -> BTreeMap<String, RenderedMessage> {
        let subject = Self::subject(hazard, country);
        let plain = Self::plain_body(hazard, country);
        let html = Self::html_body(&plain, pixel_url);

        let mut variants = BTreeMap::new();
        variants.insert(
            "en".to_string(),
            RenderedMessage {
                subject,
                plain,
                html: Some(html),
            },
        );
        variants
    }
}
