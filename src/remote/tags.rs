//! Tag-mutation payloads for the reader `edit-tag` endpoint

use super::HttpRequest;
use crate::types::ActionType;

/// Path of the tag-mutation endpoint, relative to the API base
pub const EDIT_TAG_PATH: &str = "edit-tag";

/// Build one `edit-tag` call: every item id as `i`, and `a` (add) or `r`
/// (remove) naming the read/starred state stream.
pub fn edit_tag_request<'a, I>(api_base_url: &str, action: ActionType, item_ids: I) -> HttpRequest
where
    I: IntoIterator<Item = &'a str>,
{
    let url = format!("{}/{}", api_base_url.trim_end_matches('/'), EDIT_TAG_PATH);
    let mut request = HttpRequest::post(url);

    for id in item_ids {
        request = request.form_field("i", id);
    }

    let op = if action.adds_tag() { "a" } else { "r" };
    request.form_field(op, action.tag().stream_id())
}
