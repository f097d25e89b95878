use std::path::PathBuf;

pub mod contrast;
pub mod fit;
pub mod summary;

/// `<prefix>.<suffix>`, keeping any dots already in the prefix.
pub(crate) fn output_path(prefix: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", prefix, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_keeps_dotted_prefix() {
        assert_eq!(
            output_path("out/sub-01.run1", "nsglm"),
            PathBuf::from("out/sub-01.run1.nsglm")
        );
        assert_eq!(output_path("con", "z.img"), PathBuf::from("con.z.img"));
    }
}
