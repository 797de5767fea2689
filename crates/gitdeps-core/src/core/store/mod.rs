mod working;

pub use working::{
    load_working_state, recover_interrupted, save_working_state, working_state_path,
};
