use url::Url;

use crate::error::InvalidFilterInput;

/// Keep the links whose path contains `/{sport}/` and, when leagues are
/// given, `/{league}/` for at least one of them. Matching is exact; callers
/// pass lower-case slugs. Input order is preserved.
pub fn filter_links(
    links: &[String],
    sport: &str,
    leagues: &[String],
) -> Result<Vec<String>, InvalidFilterInput> {
    if sport.is_empty() {
        return Err(InvalidFilterInput::EmptySport);
    }
    if leagues.iter().any(|l| l.is_empty()) {
        return Err(InvalidFilterInput::EmptyLeague);
    }

    let sport_segment = format!("/{}/", sport);
    let league_segments: Vec<String> = leagues.iter().map(|l| format!("/{}/", l)).collect();

    Ok(links
        .iter()
        .filter(|link| {
            let path = link_path(link);
            path.contains(&sport_segment)
                && (league_segments.is_empty()
                    || league_segments.iter().any(|seg| path.contains(seg.as_str())))
        })
        .cloned()
        .collect())
}

/// Path component of an absolute URL; anything unparseable is taken as a path.
fn link_path(link: &str) -> String {
    match Url::parse(link) {
        Ok(url) => url.path().to_string(),
        Err(_) => link.to_string(),
    }
}
