//! Hand-assembled minimal PDFs for exercising the extraction path without
//! binary fixture files. Body offsets are computed so the xref table stays
//! valid and `pdf-extract` can parse the result.

/// Builds a valid single-font PDF with one page per entry in `pages`, each
/// containing the given phrase as its text content.
pub fn minimal_pdf(pages: &[&str]) -> Vec<u8> {
    let page_count = pages.len();
    let font_id = 3 + 2 * page_count;

    let mut out = Vec::new();
    let mut offsets = Vec::with_capacity(font_id);

    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    offsets.push(out.len());
    let kids = (0..page_count)
        .map(|i| format!("{} 0 R", 3 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");
    out.extend_from_slice(
        format!("2 0 obj << /Type /Pages /Kids [{kids}] /Count {page_count} >> endobj\n")
            .as_bytes(),
    );

    for (i, text) in pages.iter().enumerate() {
        let page_id = 3 + 2 * i;
        let content_id = page_id + 1;

        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{page_id} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {content_id} 0 R /Resources << /Font << /F1 {font_id} 0 R >> >> >> endobj\n"
            )
            .as_bytes(),
        );

        let stream_body = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET\n", escape_pdf_string(text));
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{content_id} 0 obj << /Length {} >> stream\n{stream_body}endstream endobj\n",
                stream_body.len()
            )
            .as_bytes(),
        );
    }

    offsets.push(out.len());
    out.extend_from_slice(
        format!("{font_id} 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n")
            .as_bytes(),
    );

    let xref_start = out.len();
    let object_count = font_id + 1;
    out.extend_from_slice(format!("xref\n0 {object_count}\n").as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!("trailer << /Size {object_count} /Root 1 0 R >>\nstartxref\n{xref_start}\n%%EOF\n")
            .as_bytes(),
    );

    out
}

fn escape_pdf_string(text: &str) -> String {
    text.chars()
        .flat_map(|c| match c {
            '(' | ')' | '\\' => vec!['\\', c],
            other => vec![other],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_pdf_has_header_and_trailer() {
        let bytes = minimal_pdf(&["hello"]);

        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(bytes.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_escape_pdf_string() {
        assert_eq!(escape_pdf_string("a(b)c"), "a\\(b\\)c");
        assert_eq!(escape_pdf_string("back\\slash"), "back\\\\slash");
    }
}
