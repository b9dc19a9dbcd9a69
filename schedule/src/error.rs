use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Every placement strategy failed for one statement's refinement set.
    #[snafu(display(
        "block {block} requires more cache memory than is available; simultaneously required: {}",
        refs.join(", ")
    ))]
    ResourceExhausted { block: String, refs: Vec<String> },
}
