//! Raw HTML pages: localize `{{ }}` spans, then rewrite links.

use super::{ConvertError, RenderContext, SharedLocalizer, lock_localizer, process_links};
use crate::localize::Escapes;

pub(super) fn get_html(
    ctx: &RenderContext,
    localizer: &SharedLocalizer,
    text: &str,
) -> Result<String, ConvertError> {
    let text = lock_localizer(localizer).insert_localized_strings(text, Escapes::Html, None)?;
    process_links(ctx, &text)
}
