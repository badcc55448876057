/// Site id constants for the sources the collectors currently cover.
/// Site ids are what collectors put in `RawRecord::source_site_id`.
pub const SALERNO_TODAY_SITE: &str = "salernotoday";
pub const IL_PORTICO_SITE: &str = "ilportico";
pub const IL_VESCOVADO_SITE: &str = "ilvescovado";
pub const AMALFI_NEWS_SITE: &str = "amalfinews";
pub const MAIORI_NEWS_SITE: &str = "maiorinews";

/// Declared locale for each known site, used when a record arrives without one.
pub fn default_locale_for_site(site_id: &str) -> Option<&'static str> {
    match site_id {
        SALERNO_TODAY_SITE | IL_PORTICO_SITE | IL_VESCOVADO_SITE | AMALFI_NEWS_SITE
        | MAIORI_NEWS_SITE => Some("it"),
        _ => None,
    }
}

/// Site id derived from a host when a collector leaves it blank: a known
/// site if any label names one, else the label before the public suffix
/// (`www.positano.it` -> `positano`).
pub fn site_id_from_host(host: &str) -> String {
    let host = host.trim_start_matches("www.").to_lowercase();
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if let Some(known) = get_known_sites().into_iter().find(|site| labels.contains(site)) {
        return known.to_string();
    }
    match labels.len() {
        0 => host.clone(),
        1 => labels[0].to_string(),
        n => labels[n - 2].to_string(),
    }
}

/// Get all known site ids
pub fn get_known_sites() -> Vec<&'static str> {
    vec![
        SALERNO_TODAY_SITE,
        IL_PORTICO_SITE,
        IL_VESCOVADO_SITE,
        AMALFI_NEWS_SITE,
        MAIORI_NEWS_SITE,
    ]
}
