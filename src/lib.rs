pub mod constants;
pub mod field;
pub mod fit;
pub mod gblfit_errors;
pub mod geometry;
pub mod material;
pub mod measurement;
pub mod propagation;
pub mod simulation;
pub mod track_state;
pub mod trajectory;
