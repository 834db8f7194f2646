mod connector;
mod dvc;
mod per_props;
mod session;
