#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "text_model",
        action: "set_text_model",
    },
    CommandSpec {
        command: "image_model",
        action: "set_image_model",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "export",
    action: "export",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "like",
        action: "like",
    },
    CommandSpec {
        command: "yes",
        action: "like",
    },
    CommandSpec {
        command: "dislike",
        action: "dislike",
    },
    CommandSpec {
        command: "no",
        action: "dislike",
    },
    CommandSpec {
        command: "restart",
        action: "start_over",
    },
    CommandSpec {
        command: "start_over",
        action: "start_over",
    },
    CommandSpec {
        command: "dismiss",
        action: "dismiss",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const WIZARD_HELP_COMMANDS: &[&str] = &[
    "/like",
    "/dislike",
    "/restart",
    "/dismiss",
    "/status",
    "/text_model",
    "/image_model",
    "/export",
    "/help",
    "/quit",
];
