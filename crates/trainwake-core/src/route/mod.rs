mod stops;

pub use stops::{
    Resolution, Route, RouteIssue, RouteStation, RouteStop, StopEntry, StopSequence,
    StopSequenceResolver,
};
