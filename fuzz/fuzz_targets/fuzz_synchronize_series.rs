#![no_main]

use docx_patch::{max_identifier, synchronize_series, IdentifierKind, Series};
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];
    let Some((&shape, xml)) = data.split_first() else {
        return;
    };

    // Low nibble: series count; high nibble: points per series.
    let count = usize::from(shape & 0x0f);
    let points = usize::from(shape >> 4);
    let replacements: Vec<Series> = (0..count)
        .map(|i| {
            Series::new(
                format!("S{i}"),
                (0..points).map(|p| format!("C{p}")),
                (0..points).map(|p| (p % 3 != 0).then_some(p as f64)),
            )
        })
        .collect();

    if let Ok(outcome) = synchronize_series(xml, &replacements) {
        // Edits only ever splice balanced markup, so the output must still tokenize.
        let rescanned = max_identifier(&outcome.xml, IdentifierKind::ChartSeries);
        assert!(rescanned.is_ok(), "{rescanned:?}");
    }
});
