use crate::comps::Category;

const SOLD_SEARCH_BASE: &str = "https://www.ebay.com/sch/i.html";

/// Sold-and-completed eBay search for the query, so a person can look the
/// comps up by hand when no live data exists.
pub fn manual_search_url(query: &str, category: Category) -> String {
    let keywords = query.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut url = format!(
        "{SOLD_SEARCH_BASE}?_nkw={}",
        urlencoding::encode(&keywords)
    );
    if category.ebay_category_id() != "0" {
        url.push_str("&_sacat=");
        url.push_str(category.ebay_category_id());
    }
    url.push_str("&LH_Sold=1&LH_Complete=1");
    url
}
