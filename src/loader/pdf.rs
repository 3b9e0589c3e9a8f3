use super::LoaderError;
use lopdf::Document as PdfDocument;
use std::path::Path;

/// Extract the text of every page, in page order, as `(page_number, text)` pairs.
pub(crate) fn extract_pages(path: &Path) -> Result<Vec<(u32, String)>, LoaderError> {
    let document =
        PdfDocument::load(path).map_err(|error| LoaderError::Pdf(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| LoaderError::Pdf(format!("page {page_no}: {error}")))?;
        pages.push((page_no, text));
    }

    tracing::debug!(path = %path.display(), pages = pages.len(), "Extracted PDF pages");
    Ok(pages)
}
