//! Rendering of normalized tags into generated-code tokens

use crate::signal::{SignalMapping, SignalTag, TagKind};

impl SignalTag {
    /// Token used by the generated pin tables, e.g. `TIMER_TAG(TIMER3, TIMER_CH2)`
    pub fn token(&self) -> String {
        let SignalTag { kind, index, func } = self;
        let token = match kind {
            TagKind::Timer => format!("TIMER_TAG(TIMER{index}, TIMER_{func})"),
            TagKind::Spi => format!("SPI_TAG(SPI_PORT{index}, RES_SPI_{func})"),
            TagKind::Serial => format!("SERIAL_TAG(SERIAL_PORT{index}, RES_SERIAL_{func})"),
            TagKind::Adc => format!("ADC_TAG(ADC_DEVICE{index}, {func})"),
        };
        token.to_uppercase()
    }
}

/// Render a classified signal, passing through unclassified ones
pub fn format_tag(mapping: Option<&SignalMapping>) -> Option<String> {
    mapping.map(|m| m.tag.token())
}
